//! Error taxonomy at the collaborator boundaries.
//!
//! Per-item failures are absorbed at the smallest scope that can handle them:
//! a fetch failure skips the page, a parse failure yields an empty candidate
//! set, a probe failure is just a dead verdict. Only an error that escapes
//! every per-item boundary reaches the run record.

use thiserror::Error;

/// Failure to resolve a page reference to raw content
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request failed, status_code={0}")]
    Status(u16),

    #[error("page requires rendering but no renderer endpoint is configured")]
    RendererUnavailable,
}

impl FetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::RendererUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_unavailable_not_retryable() {
        assert!(!FetchError::RendererUnavailable.is_retryable());
        assert!(FetchError::Status(503).is_retryable());
    }

    #[test]
    fn test_status_display() {
        let err = FetchError::Status(404);
        assert_eq!(err.to_string(), "request failed, status_code=404");
    }
}
