/*!
    Playback engine contract.

    The system playback engine is wrapped behind a queue-of-items trait
    with an event subscription channel in place of key-value observation
    and notification centers. Items expose the per-item video-output tap
    the player polls at each display refresh.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use reel_core::PixelBuffer;
use reel_types::{TimeRange, Timestamp};

/**
    Engine readiness.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Unknown,
    ReadyToPlay,
    Failed,
}

/**
    Per-item readiness.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerItemStatus {
    Unknown,
    ReadyToPlay,
    Failed,
}

/**
    What the engine does on its own when an item plays to its end.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemEndAction {
    Advance,
    Pause,
    DoNothing,
}

/**
    One outstanding seek request.

    Two requests are equal iff all four fields match; the player's seek
    serialization depends on that.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekingInfo {
    pub target_time: Timestamp,
    pub tolerance_before: Timestamp,
    pub tolerance_after: Timestamp,
    pub should_play_after_seek: bool,
}

impl SeekingInfo {
    /**
        An exact seek (zero tolerance on both sides).
    */
    pub fn exact(target_time: Timestamp, should_play_after_seek: bool) -> Self {
        Self {
            target_time,
            tolerance_before: Timestamp::zero(),
            tolerance_after: Timestamp::zero(),
            should_play_after_seek,
        }
    }
}

/**
    A pixel buffer copied out of an item's video tap, with the display
    time it was presented at.
*/
pub struct TappedPixelBuffer {
    pub pixel_buffer: PixelBuffer,
    pub display_time: Timestamp,
}

/**
    One playable item in the engine's queue.
*/
pub trait PlaybackItem: Send + Sync {
    /// Stable identity used for queue bookkeeping and event payloads.
    fn id(&self) -> u64;

    fn status(&self) -> PlayerItemStatus;

    fn duration(&self) -> Timestamp;

    /// Enable or disable the GPU tap for this item.
    fn set_tap_enabled(&self, enabled: bool);

    /// True when the tap holds a pixel buffer newer than the last copy.
    fn has_new_pixel_buffer(&self, host_time: Timestamp) -> bool;

    fn copy_pixel_buffer(&self, host_time: Timestamp) -> Option<TappedPixelBuffer>;
}

/**
    Events the engine publishes to its subscriber.
*/
#[derive(Clone, Debug)]
pub enum PlayerEvent {
    StatusChanged(EngineStatus),
    RateChanged(f32),
    ItemStatusChanged { item: u64, status: PlayerItemStatus },
    DidPlayToEnd { item: u64 },
    Stalled { item: u64 },
}

/// Subscriber for engine events. Invoked from the engine's own context;
/// never re-entrantly from within a call into the engine.
pub type EngineObserver = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

/// Completion for a seek. Must be invoked after `seek` returns, never
/// re-entrantly from inside it; `true` means the seek finished rather
/// than being superseded.
pub type SeekCompletion = Box<dyn FnOnce(bool) + Send>;

/**
    The queue-player wrapper around the system playback engine.
*/
pub trait PlaybackEngine: Send {
    fn items(&self) -> Vec<Arc<dyn PlaybackItem>>;

    fn current_item(&self) -> Option<Arc<dyn PlaybackItem>>;

    /// Insert after `after`, or at the end of the queue when `None`.
    fn insert_after(&mut self, item: Arc<dyn PlaybackItem>, after: Option<&Arc<dyn PlaybackItem>>);

    fn remove(&mut self, item: &Arc<dyn PlaybackItem>);

    fn remove_all(&mut self);

    fn advance_to_next(&mut self);

    fn replace_current(&mut self, item: Option<Arc<dyn PlaybackItem>>);

    fn seek(&mut self, info: SeekingInfo, completion: SeekCompletion);

    fn set_rate(&mut self, rate: f32);

    fn rate(&self) -> f32;

    fn status(&self) -> EngineStatus;

    /// Current play-time of the current item.
    fn current_time(&self) -> Timestamp;

    fn set_action_at_item_end(&mut self, action: ItemEndAction);

    fn subscribe(&mut self, observer: EngineObserver);

    /// Drop every subscription installed through
    /// [`subscribe`](Self::subscribe).
    fn clear_subscriptions(&mut self);

    /**
        Install an engine-level looper over `range`, when the engine
        supports one. The default is unsupported; callers fall back to
        seek-on-end looping.
    */
    fn make_looper(&mut self, range: TimeRange) -> Option<LooperHandle> {
        let _ = range;
        None
    }
}

/**
    Retained handle for an engine-level looper; dropping it (or the
    player that holds it) releases the loop.
*/
#[derive(Debug)]
pub struct LooperHandle {
    pub id: u64,
}

/**
    The display refresh source the player taps on.
*/
pub trait DisplayLink: Send + Sync {
    /// Begin firing `callback` once per refresh with the host time.
    fn start(&self, callback: Arc<dyn Fn(Timestamp) + Send + Sync>);

    fn stop(&self);
}

/**
    A thread-backed refresh source for hosts without a vsync callback.

    Fires at a fixed interval with a host timestamp in a nanosecond
    timescale measured from link start.
*/
pub struct IntervalDisplayLink {
    interval: Duration,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalDisplayLink {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /**
        A 60 Hz link.
    */
    pub fn at_screen_rate() -> Self {
        Self::new(Duration::from_nanos(16_666_667))
    }
}

impl DisplayLink for IntervalDisplayLink {
    fn start(&self, callback: Arc<dyn Fn(Timestamp) + Send + Sync>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let handle = thread::spawn(move || {
            let epoch = Instant::now();
            while running.load(Ordering::SeqCst) {
                thread::sleep(interval);
                let host_time =
                    Timestamp::new(epoch.elapsed().as_nanos() as i64, 1_000_000_000);
                callback(host_time);
            }
        });
        *self.worker.lock() = Some(handle);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // A callback may stop the link from the link's own thread;
            // the flag alone ends it there.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for IntervalDisplayLink {
    fn drop(&mut self) {
        self.stop();
    }
}
