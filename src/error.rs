//! Failure taxonomy for the dispatch engine.

/// Errors that the dispatch engine distinguishes when deciding how to recover.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// A configured channel reference could not be resolved or has no comment surface.
    #[error("Failed to resolve channel '{reference}': {reason}")]
    Resolution { reference: String, reason: String },

    /// The text-generation backend failed or returned nothing usable.
    #[error("Comment generation failed: {0}")]
    Generation(String),

    /// Posting a reply to the platform failed.
    #[error("Failed to send reply to chat {target}: {reason}")]
    Send { target: i64, reason: String },

    /// The reply ledger could not be read or written.
    #[error("Ledger persistence error at {path}: {reason}")]
    Persistence { path: String, reason: String },

    /// No configured reference resolved to a monitorable target.
    #[error("No monitorable channels: none of the {configured} configured reference(s) resolved to a discussion target")]
    NoMonitoredTargets { configured: usize },
}
