/*!
    Pipeline error type.

    Transient frame drops are deliberately not represented here; dropping
    is the pipeline's normal response to back-pressure and timing skew, and
    is surfaced through counters and logs instead.
*/

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/**
    Errors surfaced by the media pipeline.
*/
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The container writer refused to begin a session.
    #[error("writer refused to start: {reason}")]
    StartWritingFailed { reason: String },

    /// The writer's pixel-buffer pool was queried before a session
    /// started, or the output file already exists, or the buffer
    /// attributes are unusable.
    #[error("pixel buffer pool unavailable")]
    PixelBufferPoolUnavailable,

    /// Audio track activation was attempted after writing began or
    /// completed.
    #[error("audio track cannot be activated once writing has begun")]
    AudioTrackActivation,

    /// The asset decoder could not be constructed.
    #[error("cannot create asset reader: {0}")]
    CannotCreateAssetReader(String),

    /// A state machine was asked to make a transition outside its
    /// enumerated set. The machine's state is unchanged.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: &'static str,
        to: &'static str,
    },

    /// The operation was cancelled before completing.
    #[error("cancelled")]
    Cancelled,

    /// The asset reader failed mid-session.
    #[error("reader error: {0}")]
    Reader(String),

    /// The container writer failed mid-session.
    #[error("writer error: {0}")]
    Writer(String),

    /// The host refused (or does not support) the requested realtime
    /// thread scheduling policy.
    #[error("realtime thread policy unavailable: {0}")]
    RealtimeSchedulingUnavailable(String),
}

impl Error {
    /**
        Shorthand for a reader-side failure.
    */
    pub fn reader(message: impl Into<String>) -> Self {
        Self::Reader(message.into())
    }

    /**
        Shorthand for a writer-side failure.
    */
    pub fn writer(message: impl Into<String>) -> Self {
        Self::Writer(message.into())
    }
}
