//! Error types for connect injection
//!
//! Two failure paths exist and they never mix:
//! - [`Error`] is returned for recoverable problems (script rendering,
//!   unparsable ports, bad annotation values, manifest I/O). The caller aborts
//!   the pod mutation and surfaces the error to whoever requested injection.
//! - [`invariant_violation`] halts immediately. It is reserved for states the
//!   calling system guarantees can't happen (no service name after defaulting,
//!   a CA volume requested without a valid CA reference).

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for connect injection
#[derive(Debug, Error)]
pub enum Error {
    /// Rendering a container command script failed
    #[error("render error [{context}]: {message}")]
    Render {
        /// Which script was being rendered (e.g., "init", "sidecar-prestop")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// A port annotation value could not be resolved to a port number
    #[error("invalid port '{value}': {message}")]
    InvalidPort {
        /// The raw annotation value
        value: String,
        /// Description of what's invalid
        message: String,
    },

    /// An annotation carried a value that can't be interpreted
    #[error("invalid annotation {key}='{value}': {message}")]
    InvalidAnnotation {
        /// Annotation key
        key: String,
        /// The raw annotation value
        value: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },
}

impl Error {
    /// Create a render error for the given script context
    pub fn render(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid port error
    pub fn invalid_port(value: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidPort {
            value: value.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid annotation error
    pub fn invalid_annotation(
        key: impl Into<String>,
        value: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InvalidAnnotation {
            key: key.into(),
            value: value.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Check if this error is retryable
    ///
    /// Nothing here is transient: every variant needs a configuration or
    /// manifest fix before the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Render { .. } => false,
            Error::InvalidPort { .. } => false,
            Error::InvalidAnnotation { .. } => false,
            Error::Serialization { .. } => false,
        }
    }

    /// Attach a context to a render error that was created without one
    pub fn within(self, context: &str) -> Self {
        match self {
            Error::Render { context: c, message } if c == UNKNOWN_CONTEXT => {
                Self::render(context, message)
            }
            other => other,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Render { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<std::fmt::Error> for Error {
    fn from(_: std::fmt::Error) -> Self {
        Self::render(UNKNOWN_CONTEXT, "formatter error while writing script")
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Halt on a broken contract with the calling system.
///
/// Logs the violation and panics. Used only where carrying on would emit a
/// silently broken container and the condition indicates a defect
/// upstream rather than bad user input.
#[track_caller]
pub fn invariant_violation(context: &str, msg: impl std::fmt::Display) -> ! {
    tracing::error!(context, violation = %msg, "connect injection invariant violated");
    panic!("invariant violated [{context}]: {msg}")
}
