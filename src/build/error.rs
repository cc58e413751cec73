//! Build failure taxonomy.

use std::sync::Arc;
use thiserror::Error;

pub type BuildResult<T> = std::result::Result<T, BuildError>;

/// Every way a build can fail, as seen by the API layer.
///
/// `Clone` so a single outcome can be handed to every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// Rejected before any cache entry or process exists.
    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),

    /// The generator ran and exited unsuccessfully.
    ///
    /// `diagnostics` holds the captured stderr and is deliberately left out
    /// of `Display`.
    #[error("model generation failed")]
    Generation {
        exit_code: Option<i32>,
        diagnostics: Arc<str>,
    },

    /// The generator could not be started, or talking to it faulted.
    #[error("generator infrastructure failure: {0}")]
    Infrastructure(String),

    /// The build was abandoned before completion.
    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    pub fn infrastructure(msg: impl Into<String>) -> Self {
        BuildError::Infrastructure(msg.into())
    }

    /// Captured generator stderr, if this is a generation failure.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            BuildError::Generation { diagnostics, .. } => Some(diagnostics.as_ref()),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::InvalidInvocation(_) => "invalid_invocation",
            BuildError::Generation { .. } => "generation_failure",
            BuildError::Infrastructure(_) => "infrastructure_failure",
            BuildError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_display_hides_diagnostics() {
        let err = BuildError::Generation {
            exit_code: Some(1),
            diagnostics: Arc::from("ERROR: Parser error in file /srv/GOEWS.scad"),
        };
        assert_eq!(err.to_string(), "model generation failed");
        assert!(err.diagnostics().unwrap().contains("Parser error"));
        assert_eq!(err.kind(), "generation_failure");
    }

    #[test]
    fn test_kinds_are_distinct() {
        let kinds = [
            BuildError::InvalidInvocation("x".into()).kind(),
            BuildError::infrastructure("spawn").kind(),
            BuildError::Cancelled.kind(),
        ];
        assert_eq!(kinds, ["invalid_invocation", "infrastructure_failure", "cancelled"]);
    }
}
