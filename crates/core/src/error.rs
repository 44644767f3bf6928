//! Mapper error model.

use thiserror::Error;

/// Result type used across the mapper.
pub type MapperResult<T> = Result<T, MapperError>;

/// Scheduling operation an object was (re-)submitted to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleOperation {
    Persist,
    Update,
    Remove,
}

impl ScheduleOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleOperation::Persist => "persist",
            ScheduleOperation::Update => "update",
            ScheduleOperation::Remove => "remove",
        }
    }
}

impl core::fmt::Display for ScheduleOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapper-level error.
///
/// Scheduling and identity failures are raised by the unit of work itself.
/// `Storage` and `Listener` carry failures from collaborators; they are passed
/// through unchanged and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapperError {
    /// The object is already queued for this operation in the current unflushed phase.
    #[error("{class_name} object is already scheduled for {operation}")]
    AlreadyScheduled {
        operation: ScheduleOperation,
        class_name: String,
    },

    /// Two distinct instances would share one natural key.
    #[error("identity collision for {class_name} with key {key}")]
    IdentityCollision { class_name: String, key: String },

    /// No natural key could be derived from the supplied data.
    #[error("no identifier could be derived for {class_name}")]
    MissingIdentifier { class_name: String },

    /// Scheduling or clearing was attempted while a commit was running.
    #[error("a commit is already in progress")]
    CommitInProgress,

    /// The object does not implement a capability the operation relies on.
    #[error("{class_name} does not support {capability}")]
    MissingCapability {
        class_name: String,
        capability: &'static str,
    },

    #[error("no persister registered for {0}")]
    PersisterNotFound(String),

    #[error("no repository registered for {0}")]
    RepositoryNotFound(String),

    /// A stored row was expected but not found.
    #[error("{class_name} with key {key} not found")]
    NotFound { class_name: String, key: String },

    #[error("{class_name} persister does not support action {action}")]
    UnsupportedAction { class_name: String, action: String },

    /// A lifecycle listener or callback failed.
    #[error("listener failed: {0}")]
    Listener(String),

    /// A backing store failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl MapperError {
    pub fn already_scheduled(operation: ScheduleOperation, class_name: impl Into<String>) -> Self {
        Self::AlreadyScheduled {
            operation,
            class_name: class_name.into(),
        }
    }

    pub fn missing_identifier(class_name: impl Into<String>) -> Self {
        Self::MissingIdentifier {
            class_name: class_name.into(),
        }
    }

    pub fn missing_capability(class_name: impl Into<String>, capability: &'static str) -> Self {
        Self::MissingCapability {
            class_name: class_name.into(),
            capability,
        }
    }

    pub fn listener(msg: impl Into<String>) -> Self {
        Self::Listener(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
