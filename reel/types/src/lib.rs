/*!
    Shared types for the reel media pipeline.

    This crate defines the vocabulary of the pipeline — the types that cross
    crate boundaries. It carries no platform or GPU dependencies, enabling
    consumers to depend on it without pulling in the runtime crates.
*/

mod error;
mod format;
mod time;

pub use error::{Error, Result};
pub use format::{
    ColorAttachments, ColorPrimaries, ImageOrientation, PixelFormat, Rotation, Size, TrackKind,
    TransferFunction, YcbcrMatrix,
};
pub use time::{TimeFlags, TimeRange, Timestamp};
