use crate::metric_enum;

metric_enum! {
    pub enum RdtMetric {
        LlcOccupancy => "CMTLLCOccupancy",
    }
}
