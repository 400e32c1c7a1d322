pub mod rdt;
