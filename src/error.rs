//! Core error taxonomy and call-site context helpers.
//!
//! Operations on the orchestrator, output log, and detector return
//! [`CoreError`]; the HTTP shim matches on its variants to choose a status
//! code. Everything underneath (filesystem, tmux process, sqlite) uses
//! `anyhow` context and is folded into `CoreError::Internal` at the
//! boundary.

use anyhow::{Context, Result};

/// Error kinds surfaced by the core (orchestrator, output log, detector).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    BadInput(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Extension trait for wrapping lower-level results with operation context.
pub trait ResultExt<T> {
    /// Add context with a standard "Failed to" prefix.
    fn context_op(self, operation: &str) -> Result<T>;

    /// Add context with file path information.
    fn context_path(self, operation: &str, path: &std::path::Path) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context_op(self, operation: &str) -> Result<T> {
        self.context(format!("failed to {}", operation))
    }

    fn context_path(self, operation: &str, path: &std::path::Path) -> Result<T> {
        self.context(format!("failed to {} at '{}'", operation, path.display()))
    }
}

/// Helper macro for consistent error context, kept for call sites that
/// don't already hold a `Result` in scope to chain `.context_op` onto.
#[macro_export]
macro_rules! context_wrap {
    ($result:expr, $operation:expr) => {
        $result.context(format!("failed to {}", $operation))
    };
}
