use {crate::{EntityKey, EventName, traits::BoxError}, thiserror::Error};

/// Why a single handler invocation failed.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(BoxError),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("handler expects a `{expected}` payload")]
    PayloadMismatch { expected: &'static str },
}

/// A handler failure caught during dispatch, along with where it happened.
#[derive(Error, Debug)]
#[error("handler for `{event}` failed: {source}")]
pub struct HandlerFault {
    pub emittor: EntityKey,
    pub event: EventName,
    pub source: HandlerError,
}

/// An external binding which couldn't be installed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("structural change observation is not supported by this platform")]
    UnsupportedPlatformFeature,
    #[error("can't observe removal of a node without a parent")]
    MissingParent,
}

/// A checkpoint future which can no longer complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint `{0}` was abandoned before it happened")]
    Abandoned(String),
}
