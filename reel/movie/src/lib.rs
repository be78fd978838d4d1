/*!
    The synchronized movie pipeline.

    Four tightly coupled subsystems built over the shared runtime in
    `reel-core`:

    - [`MovieInput`] decodes frames from a stored asset on a private
      thread and pushes them into the graph, paced by the wall clock, by
      a synchronized writer's readiness, or not at all.
    - [`MoviePlayer`] wraps the system playback engine's item queue, taps
      pixel buffers at each display refresh, and feeds them downstream.
    - [`MovieOutput`] consumes processed frames, converts them to the
      writer's pixel format, and encodes them to a container file.
    - [`MovieCache`] interposes a time-bounded ring between the graph and
      the output so recording can start at `now − N` seconds.

    The host platform's decoder, container writer, playback engine, and
    display-refresh source plug in through the traits in [`reader`],
    [`writer`], and [`engine`].
*/

pub mod cache;
pub mod engine;
pub mod input;
pub mod output;
pub mod player;
pub mod reader;
pub mod scheduling;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheState, MovieCache, MovieCacheConfig};
pub use engine::{
    DisplayLink, EngineObserver, EngineStatus, IntervalDisplayLink, ItemEndAction, LooperHandle,
    PlaybackEngine, PlaybackItem, PlayerEvent, PlayerItemStatus, SeekCompletion, SeekingInfo,
    TappedPixelBuffer,
};
pub use input::{
    CompletionHandler, MovieInput, MovieInputConfig, MovieInputDelegate, ProgressHandler,
};
pub use output::{
    DropCounts, FinishCompletion, MovieOutput, MovieOutputConfig, MovieOutputDelegate, PixelFilter,
    StartCompletion, WriterState,
};
pub use player::{MoviePlayer, MoviePlayerConfig, TimeObserverHandle};
pub use reader::{Asset, AssetReader, ReaderSettings, ReaderStatus};
pub use scheduling::SchedulingHint;
pub use writer::{
    AudioCodec, AudioOutputSettings, ContainerWriter, ErrorObserver, ReadinessObserver,
    VideoCodec, VideoOutputSettings, WriterBackendStatus,
};
