/*!
    Pre-roll ring buffer.

    Sits between the graph and the encoder sink and retains the most
    recent span of content, so a later decision to record can rewind to
    `now − cache_buffers_duration`.
*/

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use reel_core::{AudioSampleBuffer, FrameConsumer, Framebuffer, VideoSampleBuffer};

use crate::output::MovieOutput;

/**
    Cache lifecycle. Transitions outside the enumerated set are assertion
    failures; the machine is never left in a half-state.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Unknown,
    Idle,
    Caching,
    Writing,
    Stopped,
}

impl CacheState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Caching => "caching",
            Self::Writing => "writing",
            Self::Stopped => "stopped",
        }
    }

    pub const fn can_transition(self, to: CacheState) -> bool {
        matches!(
            (self, to),
            (Self::Unknown, Self::Idle)
                | (Self::Idle, Self::Caching)
                | (Self::Caching, Self::Writing)
                | (Self::Writing, Self::Stopped)
                | (Self::Stopped, Self::Idle)
                | (Self::Caching, Self::Idle)
                | (Self::Writing, Self::Idle)
        )
    }
}

/**
    Configuration surface of the cache.
*/
#[derive(Clone, Copy, Debug)]
pub struct MovieCacheConfig {
    /// Seconds of content the ring retains while caching.
    pub cache_buffers_duration: f64,
    /// Optional count ceiling per ring. Hosts with small capture pools
    /// set this below the pool size; unset means age-only eviction.
    pub max_cached_buffers: Option<usize>,
    /// Wall-clock budget of one drain cycle, so draining a full ring
    /// cannot starve the display loop.
    pub drain_budget: Duration,
}

impl MovieCacheConfig {
    pub fn new(cache_buffers_duration: f64) -> Self {
        Self {
            cache_buffers_duration,
            max_cached_buffers: None,
            drain_budget: Duration::from_secs_f64(1.0 / 40.0),
        }
    }

    pub fn with_max_cached_buffers(mut self, max: usize) -> Self {
        self.max_cached_buffers = Some(max);
        self
    }
}

/**
    The time-bounded ring between the graph and a [`MovieOutput`].

    While `Caching`, incoming framebuffers and sample buffers are
    retained and aged out from the front. `start_writing` attaches a sink
    that is already recording and drains the ring FIFO, bounded per cycle
    by the drain budget; the remainder drains as further frames arrive.
*/
pub struct MovieCache {
    config: MovieCacheConfig,
    state: Mutex<CacheState>,
    framebuffers: Mutex<VecDeque<Arc<Framebuffer>>>,
    video_samples: Mutex<VecDeque<VideoSampleBuffer>>,
    audio_samples: Mutex<VecDeque<AudioSampleBuffer>>,
    output: Mutex<Option<Arc<MovieOutput>>>,
}

impl MovieCache {
    pub fn new(config: MovieCacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::Idle),
            framebuffers: Mutex::new(VecDeque::new()),
            video_samples: Mutex::new(VecDeque::new()),
            audio_samples: Mutex::new(VecDeque::new()),
            output: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CacheState {
        *self.state.lock()
    }

    pub fn config(&self) -> &MovieCacheConfig {
        &self.config
    }

    /**
        Begin retaining incoming content.
    */
    pub fn start_caching(&self) {
        self.transition(CacheState::Caching);
    }

    /**
        Attach a sink that is already recording and start draining the
        ring into it, oldest first.
    */
    pub fn start_writing(&self, output: Arc<MovieOutput>) {
        self.transition(CacheState::Writing);
        *self.output.lock() = Some(output);
        self.drain_pending();
    }

    /**
        Detach the sink and clear the ring. The cache returns to `Idle`,
        ready for a new caching session.
    */
    pub fn stop_writing(&self) {
        self.transition(CacheState::Stopped);
        *self.output.lock() = None;
        self.clean_caches();
        self.transition(CacheState::Idle);
    }

    /**
        Abandon the current session (caching or writing) and clear the
        ring.
    */
    pub fn cancel_writing(&self) {
        self.transition(CacheState::Idle);
        *self.output.lock() = None;
        self.clean_caches();
    }

    /**
        Cache a passthrough video sample, or forward it while writing.
    */
    pub fn process_video_buffer(&self, sample: VideoSampleBuffer, invalidate_when_done: bool) {
        match self.state() {
            CacheState::Caching => {
                self.video_samples.lock().push_back(sample);
                self.evict_video_samples();
            }
            CacheState::Writing => {
                self.drain_pending();
                if let Some(output) = self.output.lock().clone() {
                    output.process_video_buffer(sample, invalidate_when_done);
                }
            }
            _ => trace!("discarding video sample outside a cache session"),
        }
    }

    /**
        Cache an audio sample, or forward it while writing.
    */
    pub fn process_audio_buffer(&self, sample: AudioSampleBuffer) {
        match self.state() {
            CacheState::Caching => {
                self.audio_samples.lock().push_back(sample);
                self.evict_audio_samples();
            }
            CacheState::Writing => {
                self.drain_pending();
                if let Some(output) = self.output.lock().clone() {
                    output.process_audio_buffer(sample);
                }
            }
            _ => trace!("discarding audio sample outside a cache session"),
        }
    }

    pub fn cached_framebuffer_count(&self) -> usize {
        self.framebuffers.lock().len()
    }

    pub fn cached_video_sample_count(&self) -> usize {
        self.video_samples.lock().len()
    }

    pub fn cached_audio_sample_count(&self) -> usize {
        self.audio_samples.lock().len()
    }

    /**
        Seconds between the oldest and newest retained framebuffer.
    */
    pub fn cached_duration_seconds(&self) -> f64 {
        let ring = self.framebuffers.lock();
        let oldest = ring.front().and_then(|fb| fb.timing_style().timestamp());
        let newest = ring.back().and_then(|fb| fb.timing_style().timestamp());
        match (oldest, newest) {
            (Some(oldest), Some(newest)) => newest.seconds_since(&oldest),
            _ => 0.0,
        }
    }

    fn transition(&self, to: CacheState) {
        let mut state = self.state.lock();
        assert!(
            state.can_transition(to),
            "invalid movie cache transition {} -> {}",
            state.name(),
            to.name()
        );
        *state = to;
    }

    fn evict_framebuffers(&self) {
        let mut ring = self.framebuffers.lock();
        let Some(newest) = ring.back().and_then(|fb| fb.timing_style().timestamp()) else {
            return;
        };
        let horizon = newest.seconds() - self.config.cache_buffers_duration;
        while let Some(front) = ring.front() {
            let aged_out = front
                .timing_style()
                .timestamp()
                .is_none_or(|at| at.seconds() < horizon);
            let over_count = self
                .config
                .max_cached_buffers
                .is_some_and(|max| ring.len() > max);
            if !(aged_out || over_count) {
                break;
            }
            if let Some(evicted) = ring.pop_front() {
                evicted.unlock();
            }
        }
    }

    fn evict_video_samples(&self) {
        let mut ring = self.video_samples.lock();
        let Some(newest) = ring.back().map(VideoSampleBuffer::presentation_time) else {
            return;
        };
        let horizon = newest.seconds() - self.config.cache_buffers_duration;
        while let Some(front) = ring.front() {
            let over_count = self
                .config
                .max_cached_buffers
                .is_some_and(|max| ring.len() > max);
            if front.presentation_time().seconds() >= horizon && !over_count {
                break;
            }
            ring.pop_front();
        }
    }

    fn evict_audio_samples(&self) {
        let mut ring = self.audio_samples.lock();
        let Some(newest) = ring.back().map(AudioSampleBuffer::presentation_time) else {
            return;
        };
        let horizon = newest.seconds() - self.config.cache_buffers_duration;
        while let Some(front) = ring.front() {
            if front.presentation_time().seconds() >= horizon {
                break;
            }
            ring.pop_front();
        }
    }

    /**
        Forward cached items FIFO to the sink until the ring is empty or
        the cycle budget runs out; leftovers wait for the next frame.
    */
    fn drain_pending(&self) {
        let Some(output) = self.output.lock().clone() else {
            return;
        };
        let deadline = Instant::now() + self.config.drain_budget;
        loop {
            if Instant::now() >= deadline {
                debug!("drain budget exhausted; remaining cache defers to the next cycle");
                break;
            }
            // Framebuffers carry their delivery lock into the sink, which
            // releases it after the append.
            let framebuffer = self.framebuffers.lock().pop_front();
            if let Some(framebuffer) = framebuffer {
                output.new_framebuffer_available(framebuffer, 0);
                continue;
            }
            let video = self.video_samples.lock().pop_front();
            if let Some(sample) = video {
                output.process_video_buffer(sample, true);
                continue;
            }
            let audio = self.audio_samples.lock().pop_front();
            if let Some(sample) = audio {
                output.process_audio_buffer(sample);
                continue;
            }
            break;
        }
    }

    fn clean_caches(&self) {
        let drained: Vec<_> = self.framebuffers.lock().drain(..).collect();
        for framebuffer in drained {
            framebuffer.unlock();
        }
        self.video_samples.lock().clear();
        self.audio_samples.lock().clear();
    }
}

impl FrameConsumer for MovieCache {
    fn new_framebuffer_available(&self, framebuffer: Arc<Framebuffer>, source_index: usize) {
        match self.state() {
            CacheState::Caching => {
                // Retain the delivery lock while the frame sits in the
                // ring; eviction and draining release it downstream.
                self.framebuffers.lock().push_back(framebuffer);
                self.evict_framebuffers();
            }
            CacheState::Writing => {
                self.drain_pending();
                match self.output.lock().clone() {
                    Some(output) => output.new_framebuffer_available(framebuffer, source_index),
                    None => framebuffer.unlock(),
                }
            }
            _ => {
                trace!("discarding framebuffer outside a cache session");
                framebuffer.unlock();
            }
        }
    }
}
