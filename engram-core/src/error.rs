//! Error types for the Engram resource layer.

/// Result type alias for Engram operations.
pub type Result<T> = std::result::Result<T, EngramError>;

/// Main error type for the Engram resource layer.
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    /// Cache tier errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Connection pool errors
    #[error("Pool error: {0}")]
    Pool(String),

    /// Batch queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngramError {
    /// Create a new cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a new pool error
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// Create a new queue error
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this is a pool error
    pub fn is_pool(&self) -> bool {
        matches!(self, Self::Pool(_))
    }
}
