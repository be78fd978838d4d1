/*!
    Collaborator fakes shared by the unit tests: a scripted asset/reader
    pair, a recording container writer, and a hand-driven playback
    engine.
*/

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use reel_core::{
    AudioSampleBuffer, PixelBuffer, PixelBufferPool, SampleBuffer, VideoSampleBuffer,
};
use reel_types::{
    ColorAttachments, Error, ImageOrientation, PixelFormat, Result, Size, TimeRange, Timestamp,
    TrackKind,
};

use crate::engine::{
    EngineObserver, EngineStatus, ItemEndAction, LooperHandle, PlaybackEngine, PlaybackItem,
    PlayerEvent, PlayerItemStatus, SeekCompletion, SeekingInfo, TappedPixelBuffer,
};
use crate::reader::{Asset, AssetReader, ReaderSettings, ReaderStatus};
use crate::writer::{
    AudioOutputSettings, ContainerWriter, ErrorObserver, ReadinessObserver, VideoOutputSettings,
    WriterBackendStatus,
};

// --- Container writer ----------------------------------------------------

/**
    Shared record of everything a [`FakeWriter`] was asked to do, plus the
    knobs tests script its behavior with.
*/
#[derive(Default)]
pub struct WriterLog {
    pub started: AtomicBool,
    pub session_start: Mutex<Option<Timestamp>>,
    pub session_start_count: AtomicUsize,
    pub video_appends: Mutex<Vec<Timestamp>>,
    pub video_attachments: Mutex<Vec<Option<ColorAttachments>>>,
    pub audio_appends: Mutex<Vec<Timestamp>>,
    pub end_session_at: Mutex<Option<Timestamp>>,
    pub finished_tracks: Mutex<Vec<TrackKind>>,
    pub finish_count: AtomicUsize,
    pub cancel_count: AtomicUsize,
    /// Script: refuse `start_writing`.
    pub fail_start: AtomicBool,
    /// Script: report no adaptor pool after starting.
    pub omit_pool: AtomicBool,
    /// Script: report the video input full after every append
    /// (back-pressure exercising).
    pub not_ready_after_append: AtomicBool,
    pub error: Mutex<Option<Error>>,
    video_ready: AtomicBool,
    audio_ready: AtomicBool,
    readiness_observers: Mutex<Vec<ReadinessObserver>>,
    error_observers: Mutex<Vec<ErrorObserver>>,
    pool: Mutex<Option<Arc<PixelBufferPool>>>,
    video_settings: Mutex<Option<VideoOutputSettings>>,
    audio_settings: Mutex<Option<AudioOutputSettings>>,
    status: Mutex<Option<WriterBackendStatus>>,
}

impl WriterLog {
    pub fn set_ready(&self, track: TrackKind, ready: bool) {
        match track {
            TrackKind::Video => self.video_ready.store(ready, Ordering::SeqCst),
            TrackKind::Audio => self.audio_ready.store(ready, Ordering::SeqCst),
        }
        let observers = self.readiness_observers.lock().clone();
        for observer in observers {
            observer(track, ready);
        }
    }

    pub fn emit_error(&self, error: Error) {
        *self.error.lock() = Some(error.clone());
        let observers = self.error_observers.lock().clone();
        for observer in observers {
            observer(error.clone());
        }
    }

    pub fn first_video_append(&self) -> Option<Timestamp> {
        self.video_appends.lock().first().copied()
    }

    pub fn last_video_append(&self) -> Option<Timestamp> {
        self.video_appends.lock().last().copied()
    }

    pub fn video_append_count(&self) -> usize {
        self.video_appends.lock().len()
    }
}

/**
    A container writer that records instead of encoding.
*/
pub struct FakeWriter {
    log: Arc<WriterLog>,
}

impl FakeWriter {
    pub fn new() -> (Self, Arc<WriterLog>) {
        let log = Arc::new(WriterLog::default());
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl ContainerWriter for FakeWriter {
    fn add_video_track(&mut self, settings: &VideoOutputSettings) -> Result<()> {
        *self.log.video_settings.lock() = Some(settings.clone());
        Ok(())
    }

    fn add_audio_track(&mut self, settings: &AudioOutputSettings) -> Result<()> {
        *self.log.audio_settings.lock() = Some(settings.clone());
        Ok(())
    }

    fn start_writing(&mut self) -> Result<()> {
        if self.log.fail_start.load(Ordering::SeqCst) {
            return Err(Error::writer("scripted start failure"));
        }
        let settings = self.log.video_settings.lock().clone();
        let Some(settings) = settings else {
            return Err(Error::writer("no video track configured"));
        };
        if !self.log.omit_pool.load(Ordering::SeqCst) {
            *self.log.pool.lock() = Some(PixelBufferPool::new(
                settings.width,
                settings.height,
                settings.source_pixel_format,
                3,
                12,
            ));
        }
        self.log.started.store(true, Ordering::SeqCst);
        *self.log.status.lock() = Some(WriterBackendStatus::Writing);
        self.log.set_ready(TrackKind::Video, true);
        if self.log.audio_settings.lock().is_some() {
            self.log.set_ready(TrackKind::Audio, true);
        }
        Ok(())
    }

    fn start_session(&mut self, at: Timestamp) {
        *self.log.session_start.lock() = Some(at);
        self.log.session_start_count.fetch_add(1, Ordering::SeqCst);
    }

    fn append_pixel_buffer(&mut self, buffer: PixelBuffer, at: Timestamp) -> Result<()> {
        if !self.log.started.load(Ordering::SeqCst) {
            return Err(Error::writer("append before start"));
        }
        self.log.video_appends.lock().push(at);
        self.log
            .video_attachments
            .lock()
            .push(buffer.attachments().copied());
        drop(buffer);
        if self.log.not_ready_after_append.load(Ordering::SeqCst) {
            self.log.set_ready(TrackKind::Video, false);
        }
        Ok(())
    }

    fn append_audio_sample(&mut self, sample: AudioSampleBuffer) -> Result<()> {
        self.log.audio_appends.lock().push(sample.presentation_time());
        Ok(())
    }

    fn is_ready_for_more_media_data(&self, track: TrackKind) -> bool {
        match track {
            TrackKind::Video => self.log.video_ready.load(Ordering::SeqCst),
            TrackKind::Audio => self.log.audio_ready.load(Ordering::SeqCst),
        }
    }

    fn mark_finished(&mut self, track: TrackKind) {
        self.log.finished_tracks.lock().push(track);
    }

    fn end_session(&mut self, at: Timestamp) {
        *self.log.end_session_at.lock() = Some(at);
    }

    fn finish_writing(&mut self, completion: Box<dyn FnOnce() + Send>) {
        self.log.finish_count.fetch_add(1, Ordering::SeqCst);
        *self.log.status.lock() = Some(WriterBackendStatus::Completed);
        completion();
    }

    fn cancel_writing(&mut self) {
        self.log.cancel_count.fetch_add(1, Ordering::SeqCst);
        *self.log.status.lock() = Some(WriterBackendStatus::Cancelled);
    }

    fn status(&self) -> WriterBackendStatus {
        self.log.status.lock().unwrap_or(WriterBackendStatus::Unknown)
    }

    fn error(&self) -> Option<Error> {
        self.log.error.lock().clone()
    }

    fn pixel_buffer_pool(&self) -> Option<Arc<PixelBufferPool>> {
        self.log.pool.lock().clone()
    }

    fn subscribe_readiness(&mut self, observer: ReadinessObserver) {
        self.log.readiness_observers.lock().push(observer);
    }

    fn subscribe_error(&mut self, observer: ErrorObserver) {
        self.log.error_observers.lock().push(observer);
    }
}

// --- Asset / reader ------------------------------------------------------

/**
    A scripted asset vending evenly spaced video frames (and optional
    audio chunks at the same cadence).
*/
pub struct FakeAsset {
    pub frame_count: usize,
    pub fps: i32,
    pub size: Size,
    pub orientation: ImageOrientation,
    pub with_audio: bool,
    /// Script: refuse reader construction.
    pub fail_reader: bool,
    pub readers_created: AtomicUsize,
}

impl FakeAsset {
    pub fn new(frame_count: usize, fps: i32, size: Size) -> Self {
        Self {
            frame_count,
            fps,
            size,
            orientation: ImageOrientation::Portrait,
            with_audio: false,
            fail_reader: false,
            readers_created: AtomicUsize::new(0),
        }
    }
}

impl Asset for FakeAsset {
    fn duration(&self) -> Timestamp {
        Timestamp::new(self.frame_count as i64, self.fps)
    }

    fn natural_size(&self) -> Size {
        self.size
    }

    fn preferred_orientation(&self) -> ImageOrientation {
        self.orientation
    }

    fn has_audio_track(&self) -> bool {
        self.with_audio
    }

    fn make_reader(&self, settings: &ReaderSettings) -> Result<Box<dyn AssetReader>> {
        if self.fail_reader {
            return Err(Error::CannotCreateAssetReader("scripted failure".into()));
        }
        self.readers_created.fetch_add(1, Ordering::SeqCst);
        let in_range = |index: usize| {
            let at = Timestamp::new(index as i64, self.fps);
            settings
                .time_range
                .as_ref()
                .is_none_or(|range: &TimeRange| range.contains(&at))
        };
        let video_times: VecDeque<Timestamp> = (0..self.frame_count)
            .filter(|index| in_range(*index))
            .map(|index| Timestamp::new(index as i64, self.fps))
            .collect();
        let audio_times: VecDeque<Timestamp> = if self.with_audio && settings.include_audio {
            video_times.iter().copied().collect()
        } else {
            VecDeque::new()
        };
        Ok(Box::new(FakeReader {
            size: self.size,
            pixel_format: settings.video_pixel_format,
            video_times,
            audio_times,
            status: ReaderStatus::Unknown,
        }))
    }
}

struct FakeReader {
    size: Size,
    pixel_format: PixelFormat,
    video_times: VecDeque<Timestamp>,
    audio_times: VecDeque<Timestamp>,
    status: ReaderStatus,
}

impl FakeReader {
    fn update_status(&mut self) {
        if self.status == ReaderStatus::Reading
            && self.video_times.is_empty()
            && self.audio_times.is_empty()
        {
            self.status = ReaderStatus::Completed;
        }
    }
}

impl AssetReader for FakeReader {
    fn set_time_range(&mut self, range: TimeRange) {
        self.video_times.retain(|at| range.contains(at));
        self.audio_times.retain(|at| range.contains(at));
    }

    fn start_reading(&mut self) -> Result<()> {
        self.status = ReaderStatus::Reading;
        self.update_status();
        Ok(())
    }

    fn copy_next_sample(&mut self, track: TrackKind) -> Option<SampleBuffer> {
        if self.status != ReaderStatus::Reading {
            return None;
        }
        let sample = match track {
            TrackKind::Video => self.video_times.pop_front().map(|at| {
                SampleBuffer::Video(VideoSampleBuffer::new(
                    PixelBuffer::new(self.size.width, self.size.height, self.pixel_format),
                    at,
                ))
            }),
            TrackKind::Audio => self.audio_times.pop_front().map(|at| {
                SampleBuffer::Audio(AudioSampleBuffer::new(
                    Arc::from(vec![0u8; 64].into_boxed_slice()),
                    16,
                    at,
                ))
            }),
        };
        self.update_status();
        sample
    }

    fn cancel_reading(&mut self) {
        self.status = ReaderStatus::Cancelled;
    }

    fn status(&self) -> ReaderStatus {
        self.status
    }

    fn error(&self) -> Option<Error> {
        None
    }
}

// --- Playback engine -----------------------------------------------------

/**
    A playback item vending scripted tap frames.
*/
pub struct FakeItem {
    pub item_id: u64,
    pub size: Size,
    status: Mutex<PlayerItemStatus>,
    duration: Timestamp,
    tap_enabled: AtomicBool,
    pending_frames: Mutex<VecDeque<Timestamp>>,
    pub copied: AtomicUsize,
}

impl FakeItem {
    pub fn new(item_id: u64, size: Size, duration: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            item_id,
            size,
            status: Mutex::new(PlayerItemStatus::ReadyToPlay),
            duration,
            tap_enabled: AtomicBool::new(false),
            pending_frames: Mutex::new(VecDeque::new()),
            copied: AtomicUsize::new(0),
        })
    }

    pub fn push_frame(&self, display_time: Timestamp) {
        self.pending_frames.lock().push_back(display_time);
    }

    pub fn set_status(&self, status: PlayerItemStatus) {
        *self.status.lock() = status;
    }

    pub fn tap_is_enabled(&self) -> bool {
        self.tap_enabled.load(Ordering::SeqCst)
    }
}

impl PlaybackItem for FakeItem {
    fn id(&self) -> u64 {
        self.item_id
    }

    fn status(&self) -> PlayerItemStatus {
        *self.status.lock()
    }

    fn duration(&self) -> Timestamp {
        self.duration
    }

    fn set_tap_enabled(&self, enabled: bool) {
        self.tap_enabled.store(enabled, Ordering::SeqCst);
    }

    fn has_new_pixel_buffer(&self, _host_time: Timestamp) -> bool {
        !self.pending_frames.lock().is_empty()
    }

    fn copy_pixel_buffer(&self, _host_time: Timestamp) -> Option<TappedPixelBuffer> {
        let display_time = self.pending_frames.lock().pop_front()?;
        self.copied.fetch_add(1, Ordering::SeqCst);
        Some(TappedPixelBuffer {
            pixel_buffer: PixelBuffer::new(self.size.width, self.size.height, PixelFormat::Nv12),
            display_time,
        })
    }
}

/**
    Hand-driven playback engine core. Tests hold the `Arc` and poke it
    while the player owns the boxed [`PlaybackEngine`] facade.
*/
pub struct FakeEngineCore {
    pub items: Mutex<Vec<Arc<dyn PlaybackItem>>>,
    pub rate: Mutex<f32>,
    pub status: Mutex<EngineStatus>,
    pub current_time: Mutex<Timestamp>,
    pub issued_seeks: Mutex<Vec<SeekingInfo>>,
    pending_completions: Mutex<VecDeque<(SeekingInfo, SeekCompletion)>>,
    observers: Mutex<Vec<EngineObserver>>,
    pub action_at_item_end: Mutex<ItemEndAction>,
    /// Script: hand out looper handles.
    pub supports_looper: AtomicBool,
    looper_ids: AtomicUsize,
}

impl FakeEngineCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            rate: Mutex::new(0.0),
            status: Mutex::new(EngineStatus::ReadyToPlay),
            current_time: Mutex::new(Timestamp::zero()),
            issued_seeks: Mutex::new(Vec::new()),
            pending_completions: Mutex::new(VecDeque::new()),
            observers: Mutex::new(Vec::new()),
            action_at_item_end: Mutex::new(ItemEndAction::Advance),
            supports_looper: AtomicBool::new(false),
            looper_ids: AtomicUsize::new(1),
        })
    }

    pub fn facade(self: Arc<Self>) -> Box<dyn PlaybackEngine> {
        Box::new(FakeEngine { core: self })
    }

    /// Finish the oldest outstanding seek, landing the clock on its
    /// target.
    pub fn complete_next_seek(&self) {
        let completed = self.pending_completions.lock().pop_front();
        if let Some((info, completion)) = completed {
            *self.current_time.lock() = info.target_time;
            completion(true);
        }
    }

    pub fn pending_seek_count(&self) -> usize {
        self.pending_completions.lock().len()
    }

    pub fn emit(&self, event: PlayerEvent) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer(event.clone());
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn set_status(&self, status: EngineStatus) {
        *self.status.lock() = status;
        self.emit(PlayerEvent::StatusChanged(status));
    }
}

struct FakeEngine {
    core: Arc<FakeEngineCore>,
}

impl PlaybackEngine for FakeEngine {
    fn items(&self) -> Vec<Arc<dyn PlaybackItem>> {
        self.core.items.lock().clone()
    }

    fn current_item(&self) -> Option<Arc<dyn PlaybackItem>> {
        self.core.items.lock().first().cloned()
    }

    fn insert_after(
        &mut self,
        item: Arc<dyn PlaybackItem>,
        after: Option<&Arc<dyn PlaybackItem>>,
    ) {
        let mut items = self.core.items.lock();
        match after {
            Some(after) => {
                let position = items
                    .iter()
                    .position(|existing| existing.id() == after.id())
                    .map(|index| index + 1)
                    .unwrap_or(items.len());
                items.insert(position, item);
            }
            None => items.push(item),
        }
    }

    fn remove(&mut self, item: &Arc<dyn PlaybackItem>) {
        self.core
            .items
            .lock()
            .retain(|existing| existing.id() != item.id());
    }

    fn remove_all(&mut self) {
        self.core.items.lock().clear();
    }

    fn advance_to_next(&mut self) {
        let mut items = self.core.items.lock();
        if !items.is_empty() {
            items.remove(0);
        }
    }

    fn replace_current(&mut self, item: Option<Arc<dyn PlaybackItem>>) {
        let mut items = self.core.items.lock();
        if !items.is_empty() {
            items.remove(0);
        }
        if let Some(item) = item {
            items.insert(0, item);
        }
    }

    fn seek(&mut self, info: SeekingInfo, completion: SeekCompletion) {
        self.core.issued_seeks.lock().push(info);
        self.core
            .pending_completions
            .lock()
            .push_back((info, completion));
    }

    fn set_rate(&mut self, rate: f32) {
        *self.core.rate.lock() = rate;
    }

    fn rate(&self) -> f32 {
        *self.core.rate.lock()
    }

    fn status(&self) -> EngineStatus {
        *self.core.status.lock()
    }

    fn current_time(&self) -> Timestamp {
        *self.core.current_time.lock()
    }

    fn set_action_at_item_end(&mut self, action: ItemEndAction) {
        *self.core.action_at_item_end.lock() = action;
    }

    fn subscribe(&mut self, observer: EngineObserver) {
        self.core.observers.lock().push(observer);
    }

    fn clear_subscriptions(&mut self) {
        self.core.observers.lock().clear();
    }

    fn make_looper(&mut self, _range: TimeRange) -> Option<LooperHandle> {
        if self.core.supports_looper.load(Ordering::SeqCst) {
            let id = self.core.looper_ids.fetch_add(1, Ordering::SeqCst);
            Some(LooperHandle { id: id as u64 })
        } else {
            None
        }
    }
}

/**
    A display link that never fires; tests drive
    [`MoviePlayer::display_link_tick`](crate::player::MoviePlayer::display_link_tick)
    by hand.
*/
pub struct ManualDisplayLink;

impl crate::engine::DisplayLink for ManualDisplayLink {
    fn start(&self, _callback: Arc<dyn Fn(Timestamp) + Send + Sync>) {}

    fn stop(&self) {}
}
