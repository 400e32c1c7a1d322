use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RmidmonError {
    #[error("Invalid parameter: {0}")]
    ParamError(String),

    #[error("Resource in use or unavailable: {0}")]
    ResourceError(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid hardware state: {0}")]
    HardwareError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Monitoring initialization failed on {failed} core(s)")]
    PartialInitError { failed: usize },

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

impl From<rmidmon_raw::MsrError> for RmidmonError {
    fn from(e: rmidmon_raw::MsrError) -> Self {
        RmidmonError::HardwareError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RmidmonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_error_maps_to_hardware_error() {
        let raw = rmidmon_raw::MsrError::ReadFailed {
            cpu: 2,
            msr: 0xC8F,
            source: io::Error::from(io::ErrorKind::UnexpectedEof),
        };
        let err: RmidmonError = raw.into();
        assert!(matches!(err, RmidmonError::HardwareError(ref msg) if msg.contains("0xC8F")));
    }

    #[test]
    fn test_partial_init_display() {
        let err = RmidmonError::PartialInitError { failed: 3 };
        assert_eq!(err.to_string(), "Monitoring initialization failed on 3 core(s)");
    }
}
