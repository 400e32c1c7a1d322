//! Declarative macros shared by the event and metric enums

/// Define a metric enum with automatic `name()` and `all()` implementations
///
/// # Example
/// ```
/// use rmidmon::metric_enum;
///
/// metric_enum! {
///     pub enum CacheMetric {
///         Occupancy => "CMTLLCOccupancy",
///         Misses => "LLCMisses",
///     }
/// }
///
/// let metric = CacheMetric::Occupancy;
/// assert_eq!(metric.name(), "CMTLLCOccupancy");
/// assert_eq!(CacheMetric::all().len(), 2);
/// ```
#[macro_export]
macro_rules! metric_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $str:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}

/// Encode an exporter's registry into a text buffer
///
/// # Example
/// ```ignore
/// // In main.rs metrics handler
/// let mut buffer = Vec::new();
/// gather_metrics!(buffer, encoder, state.exporter, "RDT");
/// ```
#[macro_export]
macro_rules! gather_metrics {
    ($buffer:expr, $encoder:expr, $exporter:expr, $name:literal) => {{
        let metric_families = $exporter.registry().gather();
        if let Err(e) = $encoder.encode(&metric_families, &mut $buffer) {
            tracing::error!(concat!("Failed to encode ", $name, " metrics: {}"), e);
        }
    }};
}

/// Define an enum with name() and all() methods, plus custom data per variant
///
/// # Example
/// ```
/// use rmidmon::enum_with_data;
///
/// enum_with_data! {
///     pub enum CounterBit: u64 {
///         Error => ("Error", 1 << 63),
///         Unavailable => ("Unavailable", 1 << 62),
///     }
///     impl mask -> u64
/// }
///
/// let bit = CounterBit::Unavailable;
/// assert_eq!(bit.name(), "Unavailable");
/// assert_eq!(bit.mask(), 1 << 62);
/// ```
#[macro_export]
macro_rules! enum_with_data {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $data_type:ty {
            $($variant:ident => ($str:literal, $data:expr)),* $(,)?
        }
        impl $method:ident -> $return_type:ty
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn $method(&self) -> $return_type {
                match self {
                    $($name::$variant => $data,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}
