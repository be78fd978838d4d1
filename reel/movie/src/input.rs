/*!
    Decoded-frame source.

    Drives an asset reader on a private thread and delivers decoded video
    (as color-converted framebuffers) and audio sample buffers downstream,
    under one of three pacing modes: wall-clock rate, synchronized to a
    writer's readiness, or unpaced.
*/

use std::hint;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use reel_core::{
    AudioSampleBuffer, FramebufferGenerator, PipelineContext, ReadingGate, SampleBuffer,
    TargetList, VideoSampleBuffer,
};
use reel_types::{Error, PixelFormat, Result, TimeRange, Timestamp, TrackKind};

use crate::output::MovieOutput;
use crate::reader::{Asset, AssetReader, ReaderSettings, ReaderStatus};
use crate::scheduling::SchedulingHint;
use crate::writer::AudioOutputSettings;

const STOP_NONE: u8 = 0;
const STOP_PAUSE: u8 = 1;
const STOP_CANCEL: u8 = 2;

/// Within this much of the deadline a late frame still ships; any later
/// and it drops.
const PACING_SLACK: Duration = Duration::from_millis(1);

/**
    Configuration surface of the input.
*/
#[derive(Clone, Debug)]
pub struct MovieInputConfig {
    /// Pace delivery to the samples' wall-clock rate.
    pub play_at_actual_speed: bool,
    /// Restart from the top of the range at end of asset.
    pub loop_playback: bool,
    /// Scale factor from sample time to wall clock.
    pub playrate: f32,
    /// Ceiling on delivered frame rate in the unpaced mode.
    pub max_fps: Option<f64>,
    /// Request a time-constraint scheduling policy for the reader
    /// thread.
    pub use_realtime_threads: bool,
    /// Forward raw sample buffers straight to the synchronized output,
    /// bypassing the graph.
    pub transcoding_only: bool,
    /// Pixel format the reader decodes video into.
    pub video_pixel_format: PixelFormat,
}

impl Default for MovieInputConfig {
    fn default() -> Self {
        Self {
            play_at_actual_speed: true,
            loop_playback: false,
            playrate: 1.0,
            max_fps: None,
            use_realtime_threads: false,
            transcoding_only: false,
            video_pixel_format: PixelFormat::Nv12,
        }
    }
}

/**
    End-of-asset notifications.
*/
pub trait MovieInputDelegate: Send + Sync {
    fn did_finish_movie(&self);
}

/// Invoked once when the session ends: `None` on a clean finish, the
/// error otherwise.
pub type CompletionHandler = Box<dyn FnOnce(Option<Error>) + Send>;

/// Invoked per delivered frame with the fraction of the asset consumed.
pub type ProgressHandler = Arc<dyn Fn(f64) + Send + Sync>;

enum PassOutcome {
    Finished,
    Stopped,
    Failed(Error),
}

/**
    The decoded-frame source.
*/
pub struct MovieInput {
    asset: Arc<dyn Asset>,
    config: MovieInputConfig,
    targets: TargetList,
    generator: FramebufferGenerator,
    synchronized_output: Mutex<Option<Arc<MovieOutput>>>,
    audio_encoding_target: Mutex<Option<Arc<MovieOutput>>>,
    reading_gate: Arc<ReadingGate>,
    stop_reason: Arc<AtomicU8>,
    worker: Mutex<Option<JoinHandle<()>>>,
    current_time: Mutex<Option<Timestamp>>,
    resume_time: Mutex<Option<Timestamp>>,
    completion: Mutex<Option<CompletionHandler>>,
    progress: Mutex<Option<ProgressHandler>>,
    delegate: Mutex<Option<Arc<dyn MovieInputDelegate>>>,
    weak_self: Weak<MovieInput>,
}

impl MovieInput {
    pub fn new(
        context: Arc<PipelineContext>,
        asset: Arc<dyn Asset>,
        config: MovieInputConfig,
    ) -> Arc<Self> {
        let generator = FramebufferGenerator::new(context);
        Arc::new_cyclic(|weak_self| Self {
            asset,
            config,
            targets: TargetList::new(),
            generator,
            synchronized_output: Mutex::new(None),
            audio_encoding_target: Mutex::new(None),
            reading_gate: Arc::new(ReadingGate::new()),
            stop_reason: Arc::new(AtomicU8::new(STOP_NONE)),
            worker: Mutex::new(None),
            current_time: Mutex::new(None),
            resume_time: Mutex::new(None),
            completion: Mutex::new(None),
            progress: Mutex::new(None),
            delegate: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub fn targets(&self) -> &TargetList {
        &self.targets
    }

    /**
        Attach a writer to pace against. Wall-clock pacing and looping are
        disabled for the session; the writer's readiness observers drive
        the reading gate instead.
    */
    pub fn set_synchronized_movie_output(&self, output: Arc<MovieOutput>) {
        output.install_synchronization_gate(Arc::clone(&self.reading_gate));
        *self.synchronized_output.lock() = Some(output);
    }

    /**
        Route decoded audio into an encoding sink. Activates the sink's
        audio track, which must not have started writing yet.
    */
    pub fn set_audio_encoding_target(
        &self,
        output: Arc<MovieOutput>,
        settings: &AudioOutputSettings,
    ) -> Result<()> {
        output.activate_audio_track(settings)?;
        *self.audio_encoding_target.lock() = Some(output);
        Ok(())
    }

    pub fn set_completion_handler(&self, handler: CompletionHandler) {
        *self.completion.lock() = Some(handler);
    }

    pub fn set_progress_handler(&self, handler: ProgressHandler) {
        *self.progress.lock() = Some(handler);
    }

    pub fn set_delegate(&self, delegate: Arc<dyn MovieInputDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    /// Presentation time of the most recently read sample.
    pub fn current_time(&self) -> Option<Timestamp> {
        *self.current_time.lock()
    }

    /// Observable wait count of the reading gate.
    pub fn reading_gate(&self) -> &Arc<ReadingGate> {
        &self.reading_gate
    }

    /**
        Begin or resume reading. With `is_trimming`, `at_time` and
        `duration` select a sub-range of the asset; otherwise `at_time`
        (or the remembered pause point) is the resume position. A no-op
        while a session is already running.
    */
    pub fn start(
        &self,
        at_time: Option<Timestamp>,
        duration: Option<Timestamp>,
        is_trimming: bool,
    ) -> Result<()> {
        {
            let worker = self.worker.lock();
            if let Some(handle) = worker.as_ref() {
                if !handle.is_finished() {
                    trace!("movie input already reading");
                    return Ok(());
                }
            }
        }

        let range = if is_trimming {
            match (at_time, duration) {
                (Some(start), Some(duration)) => Some(TimeRange::new(start, duration)),
                (Some(start), None) => Some(self.range_from(start)),
                _ => None,
            }
        } else {
            at_time
                .or(*self.resume_time.lock())
                .map(|start| self.range_from(start))
        };

        let settings = ReaderSettings {
            video_pixel_format: self.config.video_pixel_format,
            include_audio: self.wants_audio(),
            time_range: range,
        };
        let reader = self
            .asset
            .make_reader(&settings)
            .map_err(|err| Error::CannotCreateAssetReader(err.to_string()))?;

        self.stop_reason.store(STOP_NONE, Ordering::SeqCst);
        let this = self
            .weak_self
            .upgrade()
            .expect("movie input deallocated while in use");
        let handle = thread::Builder::new()
            .name("reel.movie-input".into())
            .spawn(move || this.read_loop(reader, settings))
            .map_err(|err| Error::reader(err.to_string()))?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /**
        Stop reading and remember the current sample time as the next
        resume point.
    */
    pub fn pause(&self) {
        *self.resume_time.lock() = *self.current_time.lock();
        self.stop_worker(STOP_PAUSE);
    }

    /**
        Park the reader thread without tearing it down.
    */
    pub fn pause_without_cancel(&self) {
        self.reading_gate.set_should_wait(true);
    }

    /// Release a reader parked by
    /// [`pause_without_cancel`](Self::pause_without_cancel).
    pub fn resume(&self) {
        self.reading_gate.set_should_wait(false);
    }

    /**
        Terminate the session. If a completion handler is still pending
        it fires with [`Error::Cancelled`].
    */
    pub fn cancel(&self) {
        self.stop_worker(STOP_CANCEL);
    }

    fn stop_worker(&self, reason: u8) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            self.stop_reason.store(reason, Ordering::SeqCst);
            // Release a parked reader so it can observe the stop.
            self.reading_gate.set_should_wait(false);
            let _ = handle.join();
        }
    }

    fn range_from(&self, start: Timestamp) -> TimeRange {
        TimeRange::new(start, self.asset.duration().subtracting(&start))
    }

    fn wants_audio(&self) -> bool {
        self.audio_encoding_target.lock().is_some()
            || (self.config.transcoding_only
                && self
                    .synchronized_output
                    .lock()
                    .as_ref()
                    .is_some_and(|output| output.has_audio_track()))
    }

    fn read_loop(self: Arc<Self>, mut reader: Box<dyn AssetReader>, settings: ReaderSettings) {
        let hint = if self.config.use_realtime_threads {
            SchedulingHint::realtime_decode()
        } else if self.synchronized_output.lock().is_some() {
            SchedulingHint::Default
        } else {
            SchedulingHint::UserInitiated
        };
        if let Err(err) = hint.apply_to_current_thread() {
            warn!(error = %err, "continuing with default thread scheduling");
        }

        loop {
            match self.read_pass(reader.as_mut()) {
                PassOutcome::Stopped => {
                    reader.cancel_reading();
                    if self.stop_reason.load(Ordering::SeqCst) == STOP_CANCEL {
                        self.deliver_completion(Some(Error::Cancelled));
                    }
                    return;
                }
                PassOutcome::Failed(err) => {
                    self.deliver_completion(Some(err));
                    return;
                }
                PassOutcome::Finished => {
                    if let Some(output) = self.synchronized_output.lock().clone() {
                        // One-shot flags the writer reads at its next
                        // processing turn.
                        output.mark_video_encoding_finished();
                        output.mark_audio_encoding_finished();
                        self.notify_finished();
                        return;
                    }
                    if self.config.loop_playback {
                        match self.asset.make_reader(&settings) {
                            Ok(next) => {
                                reader = next;
                                continue;
                            }
                            Err(err) => {
                                self.deliver_completion(Some(Error::CannotCreateAssetReader(
                                    err.to_string(),
                                )));
                                return;
                            }
                        }
                    }
                    self.notify_finished();
                    return;
                }
            }
        }
    }

    fn read_pass(&self, reader: &mut dyn AssetReader) -> PassOutcome {
        if let Err(err) = reader.start_reading() {
            return PassOutcome::Failed(err);
        }
        let mut pacer = FramePacer::new(self.config.playrate);
        let audio_wanted = self.wants_audio();

        loop {
            if self.stop_reason.load(Ordering::SeqCst) != STOP_NONE {
                return PassOutcome::Stopped;
            }
            // Parked both by pause_without_cancel and by synchronized
            // back-pressure.
            self.reading_gate.wait_until_open();
            if self.stop_reason.load(Ordering::SeqCst) != STOP_NONE {
                return PassOutcome::Stopped;
            }

            let sync_output = self.synchronized_output.lock().clone();
            let mut vended = false;

            if let Some(ref output) = sync_output {
                if output.is_video_input_ready() {
                    if let Some(SampleBuffer::Video(sample)) =
                        reader.copy_next_sample(TrackKind::Video)
                    {
                        self.deliver_video(sample);
                        vended = true;
                    }
                }
                if audio_wanted && output.is_audio_input_ready() {
                    if let Some(SampleBuffer::Audio(sample)) =
                        reader.copy_next_sample(TrackKind::Audio)
                    {
                        self.deliver_audio(sample);
                        vended = true;
                    }
                }
            } else {
                if let Some(SampleBuffer::Video(sample)) =
                    reader.copy_next_sample(TrackKind::Video)
                {
                    if self.config.play_at_actual_speed {
                        match pacer.pace(&sample.presentation_time()) {
                            Pace::Deliver => self.deliver_video(sample),
                            Pace::Behind => {
                                debug!("behind wall clock; dropping frame");
                            }
                        }
                    } else {
                        self.deliver_video(sample);
                        if let Some(max_fps) = self.config.max_fps {
                            pacer.throttle(max_fps);
                        }
                    }
                    vended = true;
                }
                if audio_wanted {
                    if let Some(SampleBuffer::Audio(sample)) =
                        reader.copy_next_sample(TrackKind::Audio)
                    {
                        self.deliver_audio(sample);
                        vended = true;
                    }
                }
            }

            match reader.status() {
                ReaderStatus::Completed => return PassOutcome::Finished,
                ReaderStatus::Failed => {
                    return PassOutcome::Failed(
                        reader
                            .error()
                            .unwrap_or_else(|| Error::reader("reader failed without an error")),
                    );
                }
                ReaderStatus::Cancelled => return PassOutcome::Stopped,
                _ => {}
            }
            if !vended {
                // Nothing was ready; yield rather than spin.
                thread::yield_now();
            }
        }
    }

    fn deliver_video(&self, mut sample: VideoSampleBuffer) {
        let at = sample.presentation_time();
        *self.current_time.lock() = Some(at);
        self.report_progress(&at);

        if self.config.transcoding_only {
            if let Some(output) = self.synchronized_output.lock().clone() {
                output.process_video_buffer(sample, true);
                return;
            }
        }

        let Some(buffer) = sample.take_pixel_buffer() else {
            return;
        };
        if let Some(framebuffer) =
            self.generator
                .generate_from_yuv(&buffer, at, self.asset.preferred_orientation())
        {
            self.targets.update_targets(&framebuffer);
        }
    }

    fn deliver_audio(&self, sample: AudioSampleBuffer) {
        let target = self.audio_encoding_target.lock().clone().or_else(|| {
            if self.config.transcoding_only {
                self.synchronized_output.lock().clone()
            } else {
                None
            }
        });
        if let Some(target) = target {
            target.process_audio_buffer(sample);
        }
    }

    fn report_progress(&self, at: &Timestamp) {
        let Some(progress) = self.progress.lock().clone() else {
            return;
        };
        let total = self.asset.duration().seconds();
        if total > 0.0 {
            progress((at.seconds() / total).clamp(0.0, 1.0));
        }
    }

    fn notify_finished(&self) {
        if let Some(delegate) = self.delegate.lock().clone() {
            delegate.did_finish_movie();
        }
        self.deliver_completion(None);
    }

    fn deliver_completion(&self, error: Option<Error>) {
        if let Some(completion) = self.completion.lock().take() {
            completion(error);
        }
    }
}

enum Pace {
    Deliver,
    Behind,
}

/**
    Wall-clock pacing for `play_at_actual_speed`.

    The first delivered sample snapshots the wall clock; each subsequent
    sample waits on the high-resolution deadline its timestamp maps to,
    scaled by the play rate. Frames already past their deadline drop.
*/
struct FramePacer {
    playrate: f64,
    origin: Option<(Instant, Timestamp)>,
    last_delivery: Option<Instant>,
}

impl FramePacer {
    fn new(playrate: f32) -> Self {
        Self {
            playrate: f64::from(playrate.max(f32::MIN_POSITIVE)),
            origin: None,
            last_delivery: None,
        }
    }

    fn pace(&mut self, at: &Timestamp) -> Pace {
        let (start_instant, start_time) = *self.origin.get_or_insert((Instant::now(), *at));
        let offset = at.seconds_since(&start_time) / self.playrate;
        let deadline = start_instant + Duration::from_secs_f64(offset.max(0.0));
        let now = Instant::now();
        if let Some(wait) = deadline.checked_duration_since(now) {
            wait_until(now + wait);
            Pace::Deliver
        } else if now.duration_since(deadline) <= PACING_SLACK {
            Pace::Deliver
        } else {
            Pace::Behind
        }
    }

    /// Hold delivery so the unpaced mode never exceeds `max_fps`.
    fn throttle(&mut self, max_fps: f64) {
        if max_fps <= 0.0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / max_fps);
        let now = Instant::now();
        if let Some(last) = self.last_delivery {
            let elapsed = now.duration_since(last);
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_delivery = Some(Instant::now());
    }
}

/**
    Sleep until close to the deadline, then spin out the remainder for
    sub-millisecond accuracy.
*/
fn wait_until(deadline: Instant) {
    const SPIN_WINDOW: Duration = Duration::from_micros(200);
    loop {
        let now = Instant::now();
        let Some(remaining) = deadline.checked_duration_since(now) else {
            return;
        };
        if remaining > SPIN_WINDOW {
            thread::sleep(remaining - SPIN_WINDOW);
        } else {
            while Instant::now() < deadline {
                hint::spin_loop();
            }
            return;
        }
    }
}
