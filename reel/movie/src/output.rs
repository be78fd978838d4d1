/*!
    Encoder sink.

    Accepts framebuffers from the graph or raw sample buffers from a
    transcoding input, converts them into the writer's native pixel
    format, and feeds the container writer while honoring the encoder's
    back-pressure.
*/

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use reel_core::{
    AudioSampleBuffer, FrameConsumer, Framebuffer, PipelineContext, PixelBuffer, ReadingGate,
    SerialQueue, VideoSampleBuffer, swizzle_rgba_to_bgra,
};
use reel_types::{
    ColorAttachments, Error, PixelFormat, Result, Size, Timestamp, TrackKind,
};

use crate::writer::{AudioOutputSettings, ContainerWriter, VideoOutputSettings};

/// Interval of the encoder-readiness poll.
const ENCODER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/**
    Recording lifecycle of the sink.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Unknown,
    Idle,
    /// Pre-recording: frames are being retained upstream, not written.
    Caching,
    Writing,
    Finished,
    Cancelled,
}

impl WriterState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Caching => "caching",
            Self::Writing => "writing",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        }
    }

    /**
        Whether `self → to` is in the enumerated transition set.
    */
    pub const fn can_transition(self, to: WriterState) -> bool {
        matches!(
            (self, to),
            (Self::Unknown, Self::Idle)
                | (Self::Idle, Self::Caching)
                | (Self::Idle, Self::Writing)
                | (Self::Caching, Self::Writing)
                | (Self::Caching, Self::Cancelled)
                | (Self::Writing, Self::Finished)
                | (Self::Writing, Self::Cancelled)
        )
    }
}

/**
    Configuration surface of the sink.
*/
#[derive(Clone, Debug)]
pub struct MovieOutputConfig {
    /// Output dimensions; incoming framebuffers must match.
    pub size: Size,
    /// Frames arrive from a live source: never stall it, drop instead.
    pub live_video: bool,
    /// Wait for encoder readiness even with `live_video` set.
    pub wait_until_ready: bool,
    /// Skip color-metadata propagation on the first buffer.
    pub disable_pixel_buffer_attachments: bool,
    /// Interleave movie fragments for streaming delivery.
    pub optimize_for_network_use: bool,
}

impl MovieOutputConfig {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            live_video: false,
            wait_until_ready: false,
            disable_pixel_buffer_attachments: false,
            optimize_for_network_use: false,
        }
    }

    pub fn live_video(mut self) -> Self {
        self.live_video = true;
        self
    }

    pub fn wait_until_ready(mut self) -> Self {
        self.wait_until_ready = true;
        self
    }

    /**
        When the encoder is not ready: `true` polls until it is, `false`
        drops the frame.
    */
    pub fn should_wait_for_encoding(&self) -> bool {
        !self.live_video || self.wait_until_ready
    }
}

/**
    Out-of-band notifications from the sink.
*/
pub trait MovieOutputDelegate: Send + Sync {
    /// The writer reported an asynchronous error. The session is not
    /// cancelled automatically.
    fn writer_error(&self, error: Error);
}

/**
    CPU-side filter applied to passthrough video buffers before append
    (e.g. a software lookup-table color grade).
*/
pub trait PixelFilter: Send + Sync {
    fn apply(&self, buffer: &mut PixelBuffer);
}

/**
    Snapshot of the recoverable-drop counters. Dropping is the pipeline's
    normal response to timing skew and back-pressure; nothing here is an
    error.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DropCounts {
    /// Frames whose timestamp did not advance past the previous append.
    pub duplicate_timestamp: u64,
    /// Frames dropped because the encoder was not ready in live mode.
    pub encoder_not_ready: u64,
    /// Frames dropped because the adaptor pool was exhausted.
    pub pool_exhausted: u64,
    /// Audio samples edited out for preceding the session anchor.
    pub audio_before_anchor: u64,
}

#[derive(Default)]
struct DropCounters {
    duplicate_timestamp: AtomicU64,
    encoder_not_ready: AtomicU64,
    pool_exhausted: AtomicU64,
    audio_before_anchor: AtomicU64,
}

/// Completion for `start_recording`; receives the startup error, if any.
pub type StartCompletion = Box<dyn FnOnce(Option<Error>) + Send>;

/// Completion for `finish_recording`; fires after the container is
/// finalized.
pub type FinishCompletion = Box<dyn FnOnce() + Send>;

/**
    The encoder sink.

    Two sink APIs feed it: [`FrameConsumer::new_framebuffer_available`]
    for graph output and [`process_video_buffer`](Self::process_video_buffer)
    for direct passthrough. Both share the append invariants: strictly
    increasing timestamps, a session anchored exactly once at the first
    appended frame, and the encoder-waiting policy.
*/
pub struct MovieOutput {
    context: Arc<PipelineContext>,
    config: MovieOutputConfig,
    writer: Mutex<Box<dyn ContainerWriter>>,
    write_queue: SerialQueue,
    /// Binary semaphore around the adaptor pool, which is not
    /// thread-safe: held for allocation and for writer cancellation.
    pool_guard: Mutex<()>,
    state: Mutex<WriterState>,
    video_ready: Arc<AtomicBool>,
    audio_ready: Arc<AtomicBool>,
    has_audio_track: Arc<AtomicBool>,
    video_encoding_finished: AtomicBool,
    audio_encoding_finished: AtomicBool,
    start_frame_time: Mutex<Option<Timestamp>>,
    previous_frame_time: Mutex<Option<Timestamp>>,
    previous_audio_time: Mutex<Option<Timestamp>>,
    recorded_duration: Mutex<Option<Timestamp>>,
    audio_queue: Mutex<VecDeque<AudioSampleBuffer>>,
    sync_gate: Arc<Mutex<Option<Arc<ReadingGate>>>>,
    delegate: Arc<Mutex<Option<Arc<dyn MovieOutputDelegate>>>>,
    video_filter: Mutex<Option<Arc<dyn PixelFilter>>>,
    attachments_applied: AtomicBool,
    frames_appended: AtomicU64,
    audio_samples_appended: AtomicU64,
    drops: DropCounters,
    weak_self: Weak<MovieOutput>,
}

impl MovieOutput {
    /**
        Wrap a container writer. Adds the video track (H.264/BGRA at the
        configured size), installs the readiness and error observers, and
        leaves the sink `Idle`.
    */
    pub fn new(
        context: Arc<PipelineContext>,
        mut writer: Box<dyn ContainerWriter>,
        config: MovieOutputConfig,
    ) -> Result<Arc<Self>> {
        let mut video_settings = VideoOutputSettings::for_size(config.size);
        if config.optimize_for_network_use {
            video_settings = video_settings.optimized_for_network_use();
        }
        writer.add_video_track(&video_settings)?;

        let video_ready = Arc::new(AtomicBool::new(false));
        let audio_ready = Arc::new(AtomicBool::new(false));
        let has_audio_track = Arc::new(AtomicBool::new(false));
        let sync_gate: Arc<Mutex<Option<Arc<ReadingGate>>>> = Arc::new(Mutex::new(None));
        let delegate: Arc<Mutex<Option<Arc<dyn MovieOutputDelegate>>>> =
            Arc::new(Mutex::new(None));

        {
            let video_ready = Arc::clone(&video_ready);
            let audio_ready = Arc::clone(&audio_ready);
            let has_audio_track = Arc::clone(&has_audio_track);
            let sync_gate = Arc::clone(&sync_gate);
            writer.subscribe_readiness(Arc::new(move |track, ready| {
                match track {
                    TrackKind::Video => video_ready.store(ready, Ordering::SeqCst),
                    TrackKind::Audio => audio_ready.store(ready, Ordering::SeqCst),
                }
                if let Some(gate) = sync_gate.lock().as_ref() {
                    let any_ready = video_ready.load(Ordering::SeqCst)
                        || (has_audio_track.load(Ordering::SeqCst)
                            && audio_ready.load(Ordering::SeqCst));
                    gate.set_should_wait(!any_ready);
                }
            }));
        }
        {
            let delegate = Arc::clone(&delegate);
            writer.subscribe_error(Arc::new(move |err| {
                if let Some(delegate) = delegate.lock().clone() {
                    delegate.writer_error(err);
                } else {
                    error!(error = %err, "container writer failed with no delegate installed");
                }
            }));
        }

        Ok(Arc::new_cyclic(|weak_self| Self {
            context,
            config,
            writer: Mutex::new(writer),
            write_queue: SerialQueue::new("reel.movie-output"),
            pool_guard: Mutex::new(()),
            state: Mutex::new(WriterState::Idle),
            video_ready,
            audio_ready,
            has_audio_track,
            video_encoding_finished: AtomicBool::new(false),
            audio_encoding_finished: AtomicBool::new(false),
            start_frame_time: Mutex::new(None),
            previous_frame_time: Mutex::new(None),
            previous_audio_time: Mutex::new(None),
            recorded_duration: Mutex::new(None),
            audio_queue: Mutex::new(VecDeque::new()),
            sync_gate,
            delegate,
            video_filter: Mutex::new(None),
            attachments_applied: AtomicBool::new(false),
            frames_appended: AtomicU64::new(0),
            audio_samples_appended: AtomicU64::new(0),
            drops: DropCounters::default(),
            weak_self: weak_self.clone(),
        }))
    }

    fn strong(&self) -> Arc<Self> {
        self.weak_self
            .upgrade()
            .expect("movie output deallocated while in use")
    }

    pub fn state(&self) -> WriterState {
        *self.state.lock()
    }

    pub fn config(&self) -> &MovieOutputConfig {
        &self.config
    }

    pub fn set_delegate(&self, delegate: Arc<dyn MovieOutputDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    /**
        Install a CPU-side filter for the passthrough video path.
    */
    pub fn set_video_filter(&self, filter: Arc<dyn PixelFilter>) {
        *self.video_filter.lock() = Some(filter);
    }

    /**
        Add the audio track. Only permitted before writing begins.
    */
    pub fn activate_audio_track(&self, settings: &AudioOutputSettings) -> Result<()> {
        {
            let state = self.state.lock();
            if !matches!(*state, WriterState::Idle | WriterState::Caching) {
                return Err(Error::AudioTrackActivation);
            }
        }
        self.writer.lock().add_audio_track(settings)?;
        self.has_audio_track.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn has_audio_track(&self) -> bool {
        self.has_audio_track.load(Ordering::SeqCst)
    }

    /**
        Enter the pre-recording state: an upstream cache is retaining
        frames while this sink waits for the decision to write.
    */
    pub fn begin_caching(&self) -> Result<()> {
        self.transition(WriterState::Caching)
    }

    /**
        Start the writer session. On failure the writer is cancelled and
        the error is delivered both through the completion and the return
        value.
    */
    pub fn start_recording(&self, completion: Option<StartCompletion>) -> Result<()> {
        let this = self.strong();
        self.write_queue.run_sync(move || {
            let result = this.start_recording_on_queue();
            if let Some(completion) = completion {
                completion(result.as_ref().err().cloned());
            }
            result
        })
    }

    fn start_recording_on_queue(&self) -> Result<()> {
        {
            let state = self.state.lock();
            if !state.can_transition(WriterState::Writing) {
                return Err(Error::InvalidStateTransition {
                    from: state.name(),
                    to: WriterState::Writing.name(),
                });
            }
        }

        self.video_encoding_finished.store(false, Ordering::SeqCst);
        self.audio_encoding_finished.store(false, Ordering::SeqCst);
        self.attachments_applied.store(false, Ordering::SeqCst);
        *self.start_frame_time.lock() = None;
        *self.previous_frame_time.lock() = None;
        *self.previous_audio_time.lock() = None;
        *self.recorded_duration.lock() = None;

        {
            let mut writer = self.writer.lock();
            if let Err(err) = writer.start_writing() {
                writer.cancel_writing();
                return Err(Error::StartWritingFailed {
                    reason: err.to_string(),
                });
            }
            if writer.pixel_buffer_pool().is_none() {
                writer.cancel_writing();
                return Err(Error::PixelBufferPoolUnavailable);
            }
            self.video_ready.store(
                writer.is_ready_for_more_media_data(TrackKind::Video),
                Ordering::SeqCst,
            );
            if self.has_audio_track() {
                self.audio_ready.store(
                    writer.is_ready_for_more_media_data(TrackKind::Audio),
                    Ordering::SeqCst,
                );
            }
        }

        self.transition(WriterState::Writing)
    }

    /**
        Direct-passthrough sink: append the sample's pixel buffer at its
        presentation time, applying the software filter when configured.
    */
    pub fn process_video_buffer(&self, mut sample: VideoSampleBuffer, invalidate_when_done: bool) {
        let frame_time = sample.presentation_time();
        if !self.accepting_video() {
            trace!("ignoring video buffer while not writing");
            if invalidate_when_done {
                sample.invalidate();
            }
            return;
        }
        if !self.timestamp_advances(&frame_time) {
            self.drops
                .duplicate_timestamp
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                at = frame_time.seconds(),
                "dropping video buffer with non-advancing timestamp"
            );
            if invalidate_when_done {
                sample.invalidate();
            }
            return;
        }
        if !self.wait_for_readiness(TrackKind::Video) {
            self.drops.encoder_not_ready.fetch_add(1, Ordering::Relaxed);
            debug!(at = frame_time.seconds(), "encoder not ready; dropping video buffer");
            if invalidate_when_done {
                sample.invalidate();
            }
            return;
        }

        let Some(mut buffer) = sample.take_pixel_buffer() else {
            warn!("video sample buffer already invalidated");
            return;
        };
        if let Some(filter) = self.video_filter.lock().clone() {
            filter.apply(&mut buffer);
        }
        self.apply_attachments(&mut buffer);
        self.append_video_buffer(buffer, frame_time);
        if invalidate_when_done {
            sample.invalidate();
        }
    }

    /**
        Queue an audio sample. Audio is held until the first video frame
        anchors the session; samples preceding the anchor are edited out.
    */
    pub fn process_audio_buffer(&self, sample: AudioSampleBuffer) {
        if !self.has_audio_track() {
            debug!("audio sample arrived with no audio track active");
            return;
        }
        self.audio_queue.lock().push_back(sample);
        self.flush_audio_queue();
    }

    /// One-shot flag from a synchronized input: no more video will
    /// arrive. Read at the next processing turn.
    pub fn mark_video_encoding_finished(&self) {
        self.video_encoding_finished.store(true, Ordering::SeqCst);
    }

    /// One-shot flag from a synchronized input: no more audio will
    /// arrive.
    pub fn mark_audio_encoding_finished(&self) {
        self.audio_encoding_finished.store(true, Ordering::SeqCst);
    }

    /**
        Finalize the recording: mark the inputs finished, close the
        session at the last appended timestamp, and wait for the container
        to be written out.
    */
    pub fn finish_recording(&self, completion: Option<FinishCompletion>) -> Result<()> {
        let this = self.strong();
        self.write_queue.run_sync(move || {
            let result = this.finish_recording_on_queue();
            if result.is_ok() {
                if let Some(completion) = completion {
                    completion();
                }
            }
            result
        })
    }

    fn finish_recording_on_queue(&self) -> Result<()> {
        {
            let state = self.state.lock();
            if !state.can_transition(WriterState::Finished) {
                return Err(Error::InvalidStateTransition {
                    from: state.name(),
                    to: WriterState::Finished.name(),
                });
            }
        }

        self.video_encoding_finished.store(true, Ordering::SeqCst);
        self.audio_encoding_finished.store(true, Ordering::SeqCst);
        // Drain what audio can still drain before the inputs close; the
        // finished flags above keep the readiness poll from stalling on a
        // full input.
        self.flush_audio_queue();

        let (sender, receiver) = bounded::<()>(1);
        {
            let mut writer = self.writer.lock();
            writer.mark_finished(TrackKind::Video);
            if self.has_audio_track() {
                writer.mark_finished(TrackKind::Audio);
            }
            if let Some(last) = *self.previous_frame_time.lock() {
                writer.end_session(last);
                if let Some(start) = *self.start_frame_time.lock() {
                    *self.recorded_duration.lock() = Some(last.subtracting(&start));
                }
            }
            writer.finish_writing(Box::new(move || {
                let _ = sender.send(());
            }));
        }
        // Await the writer's completion before reporting finished.
        let _ = receiver.recv();

        self.transition(WriterState::Finished)
    }

    /**
        Abort the recording. The writer is cancelled under the pool
        semaphore so no allocation races the teardown.
    */
    pub fn cancel_recording(&self) -> Result<()> {
        let this = self.strong();
        self.write_queue.run_sync(move || {
            {
                let state = this.state.lock();
                if !state.can_transition(WriterState::Cancelled) {
                    return Err(Error::InvalidStateTransition {
                        from: state.name(),
                        to: WriterState::Cancelled.name(),
                    });
                }
            }
            this.video_encoding_finished.store(true, Ordering::SeqCst);
            this.audio_encoding_finished.store(true, Ordering::SeqCst);
            {
                let _pool = this.pool_guard.lock();
                this.writer.lock().cancel_writing();
            }
            this.audio_queue.lock().clear();
            this.transition(WriterState::Cancelled)
        })
    }

    /// `last appended − session anchor`, available once recording
    /// finished.
    pub fn recorded_duration(&self) -> Option<Timestamp> {
        *self.recorded_duration.lock()
    }

    pub fn frames_appended(&self) -> u64 {
        self.frames_appended.load(Ordering::SeqCst)
    }

    pub fn audio_samples_appended(&self) -> u64 {
        self.audio_samples_appended.load(Ordering::SeqCst)
    }

    pub fn drop_counts(&self) -> DropCounts {
        DropCounts {
            duplicate_timestamp: self.drops.duplicate_timestamp.load(Ordering::Relaxed),
            encoder_not_ready: self.drops.encoder_not_ready.load(Ordering::Relaxed),
            pool_exhausted: self.drops.pool_exhausted.load(Ordering::Relaxed),
            audio_before_anchor: self.drops.audio_before_anchor.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn is_video_input_ready(&self) -> bool {
        self.video_ready.load(Ordering::SeqCst)
    }

    pub(crate) fn is_audio_input_ready(&self) -> bool {
        self.audio_ready.load(Ordering::SeqCst)
    }

    /**
        Attach the reading gate of a synchronized input. From here on,
        readiness changes open the gate when either input can accept data
        and close it when both are full.
    */
    pub(crate) fn install_synchronization_gate(&self, gate: Arc<ReadingGate>) {
        let any_ready = self.video_ready.load(Ordering::SeqCst)
            || (self.has_audio_track() && self.audio_ready.load(Ordering::SeqCst));
        gate.set_should_wait(!any_ready);
        *self.sync_gate.lock() = Some(gate);
    }

    fn transition(&self, to: WriterState) -> Result<()> {
        let mut state = self.state.lock();
        if !state.can_transition(to) {
            return Err(Error::InvalidStateTransition {
                from: state.name(),
                to: to.name(),
            });
        }
        *state = to;
        Ok(())
    }

    fn accepting_video(&self) -> bool {
        *self.state.lock() == WriterState::Writing
            && !self.video_encoding_finished.load(Ordering::SeqCst)
    }

    fn timestamp_advances(&self, frame_time: &Timestamp) -> bool {
        match *self.previous_frame_time.lock() {
            Some(previous) => frame_time.is_after(&previous),
            None => true,
        }
    }

    /**
        Wait for the track to accept data, per the encoder-waiting
        policy. Returns false when the frame should be dropped instead.
    */
    fn wait_for_readiness(&self, track: TrackKind) -> bool {
        let (ready, finished) = match track {
            TrackKind::Video => (&*self.video_ready, &self.video_encoding_finished),
            TrackKind::Audio => (&*self.audio_ready, &self.audio_encoding_finished),
        };
        if ready.load(Ordering::SeqCst) {
            return true;
        }
        if !self.config.should_wait_for_encoding() {
            return false;
        }
        while !ready.load(Ordering::SeqCst) {
            if finished.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(ENCODER_POLL_INTERVAL);
        }
        true
    }

    fn apply_attachments(&self, buffer: &mut PixelBuffer) {
        if self.config.disable_pixel_buffer_attachments {
            return;
        }
        if !self.attachments_applied.swap(true, Ordering::SeqCst) {
            buffer.set_attachments(ColorAttachments::default());
        }
    }

    /**
        The tail both sink paths share: anchor the session at the first
        frame, append, and let queued audio follow.
    */
    fn append_video_buffer(&self, buffer: PixelBuffer, frame_time: Timestamp) {
        {
            let mut writer = self.writer.lock();
            let mut start_frame_time = self.start_frame_time.lock();
            if start_frame_time.is_none() {
                writer.start_session(frame_time);
                *start_frame_time = Some(frame_time);
            }
            drop(start_frame_time);
            match writer.append_pixel_buffer(buffer, frame_time) {
                Ok(()) => {
                    *self.previous_frame_time.lock() = Some(frame_time);
                    self.frames_appended.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    // The frame is lost; the session continues.
                    error!(error = %err, at = frame_time.seconds(), "video append failed");
                }
            }
        }
        self.flush_audio_queue();
    }

    fn flush_audio_queue(&self) {
        if *self.state.lock() != WriterState::Writing {
            return;
        }
        let Some(anchor) = *self.start_frame_time.lock() else {
            // No video appended yet; audio keeps queueing.
            return;
        };
        loop {
            let Some(sample) = self.audio_queue.lock().pop_front() else {
                break;
            };
            let at = sample.presentation_time();
            if at.is_before(&anchor) {
                self.drops
                    .audio_before_anchor
                    .fetch_add(1, Ordering::Relaxed);
                trace!(at = at.seconds(), "audio sample precedes session anchor");
                continue;
            }
            if let Some(previous) = *self.previous_audio_time.lock() {
                if !at.is_after(&previous) {
                    self.drops
                        .duplicate_timestamp
                        .fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            if !self.wait_for_readiness(TrackKind::Audio) {
                self.drops.encoder_not_ready.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match self.writer.lock().append_audio_sample(sample) {
                Ok(()) => {
                    *self.previous_audio_time.lock() = Some(at);
                    self.audio_samples_appended.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => error!(error = %err, "audio append failed"),
            }
        }
    }

    fn append_framebuffer(&self, framebuffer: &Arc<Framebuffer>) {
        if !self.accepting_video() {
            trace!("ignoring framebuffer while not writing");
            return;
        }
        let Some(frame_time) = framebuffer.timing_style().timestamp() else {
            warn!("framebuffer without a video timestamp reached the encoder sink");
            return;
        };
        if !self.timestamp_advances(&frame_time) {
            self.drops
                .duplicate_timestamp
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                at = frame_time.seconds(),
                "dropping framebuffer with non-advancing timestamp"
            );
            return;
        }
        if framebuffer.size() != self.config.size {
            warn!(
                width = framebuffer.size().width,
                height = framebuffer.size().height,
                "framebuffer size does not match the configured output"
            );
            return;
        }
        if !self.wait_for_readiness(TrackKind::Video) {
            self.drops.encoder_not_ready.fetch_add(1, Ordering::Relaxed);
            debug!(at = frame_time.seconds(), "encoder not ready; dropping framebuffer");
            return;
        }

        // Pull a buffer from the adaptor pool under the pool semaphore.
        let mut buffer = {
            let _pool_guard = self.pool_guard.lock();
            let pool = self.writer.lock().pixel_buffer_pool();
            let Some(pool) = pool else {
                warn!("adaptor pool vanished mid-session");
                return;
            };
            match pool.try_acquire() {
                Some(buffer) => buffer,
                None => {
                    self.drops.pool_exhausted.fetch_add(1, Ordering::Relaxed);
                    debug!("adaptor pool exhausted; dropping framebuffer");
                    return;
                }
            }
        };

        // Texture read-back happens on the image-processing queue; from
        // any other thread this blocks until the queue produces it.
        let rgba = {
            let framebuffer = Arc::clone(framebuffer);
            self.context
                .image_queue()
                .run_sync(move || framebuffer.read_pixels())
        };
        match buffer.format() {
            PixelFormat::Bgra => swizzle_rgba_to_bgra(&rgba, buffer.plane_mut(0)),
            // Formats already agree: take the direct-copy fast path.
            PixelFormat::Rgba => buffer.plane_mut(0).copy_from_slice(&rgba),
            other => {
                warn!(?other, "adaptor pool format is not renderable");
                return;
            }
        }
        self.apply_attachments(&mut buffer);
        self.append_video_buffer(buffer, frame_time);
    }
}

impl FrameConsumer for MovieOutput {
    fn new_framebuffer_available(&self, framebuffer: Arc<Framebuffer>, _source_index: usize) {
        self.append_framebuffer(&framebuffer);
        framebuffer.unlock();
    }
}
