//! Error type shared by every reactive operation.

use thiserror::Error;

use crate::storage::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Writing to an observable that has no write capability.
    #[error("this observable can't be written to")]
    NotWritable,

    /// Reading a computed that never completed an evaluation.
    #[error("computed has no value yet")]
    NoValue,

    #[error("node {0:?} is not registered on this thread")]
    NodeNotFound(NodeId),

    /// A node was accessed through a handle of the wrong value type.
    #[error("node {0:?} holds a value of a different type")]
    TypeMismatch(NodeId),

    #[error("evaluation failed: {message}")]
    Evaluation { message: String },

    #[error(transparent)]
    Custom(Box<dyn std::error::Error + 'static>),
}

impl Error {
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Error an evaluator can return to abort the current evaluation.
    #[must_use]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn custom(error: impl std::error::Error + 'static) -> Self {
        Self::Custom(Box::new(error))
    }
}
