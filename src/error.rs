//! Renderer error types

use crate::backend::BackendError;
use thiserror::Error;

/// Errors produced by binding tables, scene flattening and the batch renderer
#[derive(Error, Debug)]
pub enum RendererError {
    /// Every slot of a binding table is live. Capacities are fixed at scene-build
    /// time, so this is never retried.
    #[error("binding table '{table}' is out of slots (capacity {capacity})")]
    OutOfSlots { table: String, capacity: u32 },
    /// A required device capability is missing.
    #[error("unsupported device feature: {0}")]
    UnsupportedFeature(String),
    /// A scene asks for more entries than a fixed-size table region holds.
    #[error("{kind} count {count} exceeds the fixed maximum of {max}")]
    CapacityExceeded {
        kind: &'static str,
        count: usize,
        max: usize,
    },
    /// A scene, image or shader failed to load or parse.
    #[error("asset load failure: {0}")]
    AssetLoadFailure(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RendererResult<T> = Result<T, RendererError>;

/// Print a diagnostic and terminate the process.
///
/// Intended for binaries. Library code returns errors and never exits.
pub fn fatal(err: &RendererError) -> ! {
    log::error!("fatal renderer error: {err}");
    eprintln!("fatal: {err}");
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RendererError::OutOfSlots {
            table: "uniforms".to_string(),
            capacity: 4,
        };
        assert_eq!(
            err.to_string(),
            "binding table 'uniforms' is out of slots (capacity 4)"
        );

        let err = RendererError::CapacityExceeded {
            kind: "sampler",
            count: 33,
            max: 32,
        };
        assert_eq!(err.to_string(), "sampler count 33 exceeds the fixed maximum of 32");
    }

    #[test]
    fn test_backend_error_converts() {
        let err: RendererError = BackendError::DeviceLost.into();
        assert!(matches!(err, RendererError::Backend(BackendError::DeviceLost)));
        assert_eq!(err.to_string(), "GPU device lost");
    }
}
