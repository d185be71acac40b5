//! Cloud engine error types
//!
//! Providers report failures through these variants instead of free-form
//! text, so call sites classify errors by kind and never by message.

use thiserror::Error;

/// Cloud engine errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Invalid status: {resource} is {current}, cannot {operation}")]
    InvalidStatus {
        resource: String,
        current: String,
        operation: String,
    },

    #[error("Already in requested state: {0}")]
    AlreadyInState(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("Ambiguous result: {0}")]
    AmbiguousResult(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("Config error: {0}")]
    Config(#[from] cloudweave_config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classification of an error, independent of the context wrapped around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    DuplicateId,
    InvalidStatus,
    AlreadyInState,
    Timeout,
    JobFailed,
    AmbiguousResult,
    Transient,
    Cancelled,
    NotSupported,
    ProviderNotFound,
    InvalidInput,
    Other,
}

impl CloudError {
    pub fn invalid_status(
        resource: impl Into<String>,
        current: impl std::fmt::Display,
        operation: impl Into<String>,
    ) -> Self {
        CloudError::InvalidStatus {
            resource: resource.into(),
            current: current.to_string(),
            operation: operation.into(),
        }
    }

    /// The innermost error, with every context layer peeled off
    pub fn root(&self) -> &CloudError {
        let mut err = self;
        while let CloudError::Context { source, .. } = err {
            err = source;
        }
        err
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            CloudError::NotFound(_) => ErrorKind::NotFound,
            CloudError::DuplicateId(_) => ErrorKind::DuplicateId,
            CloudError::InvalidStatus { .. } => ErrorKind::InvalidStatus,
            CloudError::AlreadyInState(_) => ErrorKind::AlreadyInState,
            CloudError::Timeout(_) => ErrorKind::Timeout,
            CloudError::JobFailed { .. } => ErrorKind::JobFailed,
            CloudError::AmbiguousResult(_) => ErrorKind::AmbiguousResult,
            CloudError::Transient(_) => ErrorKind::Transient,
            CloudError::Cancelled(_) => ErrorKind::Cancelled,
            CloudError::NotSupported(_) => ErrorKind::NotSupported,
            CloudError::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            CloudError::InvalidRule(_) | CloudError::InvalidConfig(_) | CloudError::Config(_) => {
                ErrorKind::InvalidInput
            }
            CloudError::ApiError(_) | CloudError::Json(_) | CloudError::Context { .. } => {
                ErrorKind::Other
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Wrap this error with call-site context
    pub fn context(self, context: impl Into<String>) -> Self {
        CloudError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Context wrapping for `Result`s carrying a [`CloudError`]
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<CloudError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
