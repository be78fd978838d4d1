/*!
    Display-tap source.

    Wraps the playback engine's item queue, copies pixel buffers out of
    the current item's video tap at each display refresh, pushes them
    into the graph, and fires time observers as play-time crosses their
    targets.
*/

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use reel_core::{FramebufferGenerator, PipelineContext, TargetList};
use reel_types::{ImageOrientation, TimeRange, Timestamp};

use crate::engine::{
    DisplayLink, EngineStatus, LooperHandle, PlaybackEngine, PlaybackItem, PlayerEvent,
    PlayerItemStatus, SeekingInfo,
};

/**
    Configuration surface of the player.
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct MoviePlayerConfig {
    /// Loop through an engine-level looper instead of seek-on-end.
    /// Engines without looper support fall back to seek-on-end.
    pub should_use_looper: bool,
}

/**
    Handle returned by [`MoviePlayer::add_time_observer`].
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeObserverHandle(u64);

#[derive(Clone)]
struct TimeObserver {
    target_time: Timestamp,
    callback: Arc<dyn Fn(Timestamp) + Send + Sync>,
    id: u64,
}

struct PlayerState {
    is_playing: bool,
    loop_enabled: bool,
    actual_start_time: Timestamp,
    actual_end_time: Option<Timestamp>,
    last_item: Option<Arc<dyn PlaybackItem>>,
    pending_items: VecDeque<Arc<dyn PlaybackItem>>,
    current_item_played_to_end: bool,
    next_seeking: Option<SeekingInfo>,
    seek_in_flight: Option<SeekingInfo>,
    /// Total observer set, sorted descending by target time.
    time_observers: Vec<TimeObserver>,
    /// Live queue for the current play session, also descending; fired
    /// from the tail.
    active_observers: Vec<TimeObserver>,
    fired_this_session: HashSet<u64>,
    end_observer_fired: bool,
    looper: Option<LooperHandle>,
    cleaned_up: bool,
}

impl PlayerState {
    fn new() -> Self {
        Self {
            is_playing: false,
            loop_enabled: false,
            actual_start_time: Timestamp::zero(),
            actual_end_time: None,
            last_item: None,
            pending_items: VecDeque::new(),
            current_item_played_to_end: false,
            next_seeking: None,
            seek_in_flight: None,
            time_observers: Vec::new(),
            active_observers: Vec::new(),
            fired_this_session: HashSet::new(),
            end_observer_fired: false,
            looper: None,
            cleaned_up: false,
        }
    }
}

/**
    The display-tap source.

    `cleanup()` must be called before the last reference drops; it tears
    down the engine subscriptions and the display link.
*/
pub struct MoviePlayer {
    generator: FramebufferGenerator,
    targets: TargetList,
    engine: Mutex<Box<dyn PlaybackEngine>>,
    display_link: Arc<dyn DisplayLink>,
    config: MoviePlayerConfig,
    st: Mutex<PlayerState>,
    is_processing: AtomicBool,
    next_observer_id: AtomicU64,
    weak_self: Weak<MoviePlayer>,
}

impl MoviePlayer {
    pub fn new(
        context: Arc<PipelineContext>,
        engine: Box<dyn PlaybackEngine>,
        display_link: Arc<dyn DisplayLink>,
        config: MoviePlayerConfig,
    ) -> Arc<Self> {
        let generator = FramebufferGenerator::new(context);
        let player = Arc::new_cyclic(|weak_self| Self {
            generator,
            targets: TargetList::new(),
            engine: Mutex::new(engine),
            display_link,
            config,
            st: Mutex::new(PlayerState::new()),
            is_processing: AtomicBool::new(false),
            next_observer_id: AtomicU64::new(1),
            weak_self: weak_self.clone(),
        });

        let weak = Arc::downgrade(&player);
        player.engine.lock().subscribe(Arc::new(move |event| {
            if let Some(player) = weak.upgrade() {
                player.handle_engine_event(event);
            }
        }));
        player
    }

    pub fn targets(&self) -> &TargetList {
        &self.targets
    }

    // --- Item management -------------------------------------------------

    /**
        Replace the currently playing item. While the queue's sole item
        has played to end (and no looper is active), the replacement is
        deferred and drained in the did-play-to-end handler, because the
        engine strips items inserted at that boundary.
    */
    pub fn replace_current_item(&self, item: Arc<dyn PlaybackItem>, enable_tap: bool) {
        item.set_tap_enabled(enable_tap);
        {
            let mut st = self.st.lock();
            st.last_item = Some(Arc::clone(&item));
        }
        if self.should_defer_insert() {
            self.st.lock().pending_items.push_back(item);
            return;
        }
        self.engine.lock().replace_current(Some(item));
    }

    /**
        Insert an item after `after` (or at the end). Subject to the same
        deferral rule as [`replace_current_item`](Self::replace_current_item).
    */
    pub fn insert(
        &self,
        item: Arc<dyn PlaybackItem>,
        after: Option<&Arc<dyn PlaybackItem>>,
        enable_tap: bool,
    ) {
        item.set_tap_enabled(enable_tap);
        {
            let mut st = self.st.lock();
            st.last_item = Some(Arc::clone(&item));
        }
        if self.should_defer_insert() {
            self.st.lock().pending_items.push_back(item);
            return;
        }
        self.engine.lock().insert_after(item, after);
    }

    pub fn remove(&self, item: &Arc<dyn PlaybackItem>) {
        item.set_tap_enabled(false);
        self.engine.lock().remove(item);
    }

    pub fn remove_all_items(&self) {
        self.engine.lock().remove_all();
    }

    pub fn advance_to_next_item(&self) {
        self.engine.lock().advance_to_next();
    }

    /**
        Put the most recently supplied item back as current and restart
        the play session.
    */
    pub fn replay_last_item(&self) {
        let last = self.st.lock().last_item.clone();
        if let Some(item) = last {
            self.engine.lock().replace_current(Some(item));
            self.start();
        }
    }

    // --- Playback --------------------------------------------------------

    pub fn play(&self) {
        self.st.lock().is_playing = true;
        self.engine.lock().set_rate(1.0);
        self.start_display_link();
    }

    pub fn pause(&self) {
        self.st.lock().is_playing = false;
        self.engine.lock().set_rate(0.0);
    }

    pub fn resume(&self) {
        self.play();
    }

    /**
        Begin a fresh play session: reset the per-session observer
        bookkeeping, rebuild the live observer queue, seek to the start
        of the play range, and play.
    */
    pub fn start(&self) {
        let start_time = {
            let mut st = self.st.lock();
            st.end_observer_fired = false;
            st.current_item_played_to_end = false;
            st.fired_this_session.clear();
            st.actual_start_time
        };
        self.rebuild_active_observers();
        self.seek(SeekingInfo::exact(start_time, true));
        self.play();
    }

    pub fn stop(&self) {
        self.pause();
        self.display_link.stop();
        self.engine.lock().remove_all();
    }

    pub fn play_immediately(&self, rate: f32) {
        self.st.lock().is_playing = rate != 0.0;
        self.engine.lock().set_rate(rate);
        if rate != 0.0 {
            self.start_display_link();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.st.lock().is_playing
    }

    // --- Seeking ---------------------------------------------------------

    pub fn seek_to_time(&self, target_time: Timestamp, should_play_after_seeking: bool) {
        self.seek(SeekingInfo::exact(target_time, should_play_after_seeking));
    }

    /**
        Record a seek request. At most one seek is in flight; a newer
        request stored while one is active becomes the next request when
        the active one completes.
    */
    pub fn seek(&self, info: SeekingInfo) {
        let issue = {
            let mut st = self.st.lock();
            st.next_seeking = Some(info);
            st.seek_in_flight.is_none().then_some(info)
        };
        if let Some(info) = issue {
            if self.engine.lock().status() == EngineStatus::ReadyToPlay {
                self.issue_seek(info);
            }
            // Not ready: the request stays in next_seeking and is pumped
            // when the engine reports ready.
        }
    }

    /// The stored-but-not-yet-issued request, if any.
    pub fn next_seeking(&self) -> Option<SeekingInfo> {
        self.st.lock().next_seeking
    }

    fn issue_seek(&self, info: SeekingInfo) {
        self.st.lock().seek_in_flight = Some(info);
        let weak = self.weak_self.clone();
        self.engine.lock().seek(
            info,
            Box::new(move |finished| {
                if let Some(player) = weak.upgrade() {
                    player.seek_completed(info, finished);
                }
            }),
        );
    }

    fn seek_completed(&self, completed: SeekingInfo, _finished: bool) {
        let reissue = {
            let mut st = self.st.lock();
            st.seek_in_flight = None;
            match st.next_seeking {
                Some(next) if next != completed => Some(next),
                _ => {
                    st.next_seeking = None;
                    None
                }
            }
        };
        if let Some(next) = reissue {
            self.issue_seek(next);
            return;
        }
        self.rebuild_active_observers();
        if completed.should_play_after_seek {
            self.play();
        }
    }

    fn pump_seek(&self) {
        let pending = {
            let st = self.st.lock();
            if st.seek_in_flight.is_none() {
                st.next_seeking
            } else {
                None
            }
        };
        if let Some(info) = pending {
            self.issue_seek(info);
        }
    }

    // --- Looping ---------------------------------------------------------

    /**
        Toggle looping over `range`. With `should_use_looper` set the
        engine is asked for a looper; otherwise (or when the engine has
        none) reaching the range end seeks back to its start.
    */
    pub fn set_loop_enabled(&self, enabled: bool, range: Option<TimeRange>) {
        let request_looper = {
            let mut st = self.st.lock();
            st.loop_enabled = enabled;
            match range {
                Some(range) => {
                    st.actual_start_time = range.start;
                    st.actual_end_time = Some(range.end());
                }
                None if !enabled => {
                    st.actual_start_time = Timestamp::zero();
                    st.actual_end_time = None;
                }
                None => {}
            }
            if !enabled {
                st.looper = None;
            }
            enabled && self.config.should_use_looper && st.looper.is_none()
        };
        if request_looper {
            if let Some(range) = range {
                match self.engine.lock().make_looper(range) {
                    Some(handle) => self.st.lock().looper = Some(handle),
                    None => debug!("engine looper unavailable; using seek-on-end"),
                }
            }
        }
    }

    // --- Time observers --------------------------------------------------

    /**
        Register a callback for when play-time crosses `at`. Delivered at
        most once per play session, in descending-registration order
        popped from the tail of the live queue.
    */
    pub fn add_time_observer(
        &self,
        at: Timestamp,
        callback: impl Fn(Timestamp) + Send + Sync + 'static,
    ) -> TimeObserverHandle {
        let id = self.next_observer_id.fetch_add(1, Ordering::SeqCst);
        let observer = TimeObserver {
            target_time: at,
            callback: Arc::new(callback),
            id,
        };
        let mut st = self.st.lock();
        let position = st
            .time_observers
            .iter()
            .position(|existing| existing.target_time.is_before(&at))
            .unwrap_or(st.time_observers.len());
        st.time_observers.insert(position, observer);
        TimeObserverHandle(id)
    }

    pub fn remove_time_observer(&self, handle: TimeObserverHandle) {
        let mut st = self.st.lock();
        st.time_observers.retain(|observer| observer.id != handle.0);
        st.active_observers
            .retain(|observer| observer.id != handle.0);
    }

    pub fn remove_all_time_observers(&self) {
        let mut st = self.st.lock();
        st.time_observers.clear();
        st.active_observers.clear();
    }

    /**
        Rebuild the live queue: exactly those observers whose target lies
        within the active play range and which have not fired this
        session.
    */
    fn rebuild_active_observers(&self) {
        let mut st = self.st.lock();
        let start = st.actual_start_time;
        let end = st.actual_end_time;
        let fired = st.fired_this_session.clone();
        st.active_observers = st
            .time_observers
            .iter()
            .filter(|observer| {
                !observer.target_time.is_before(&start)
                    && end.is_none_or(|end| !observer.target_time.is_after(&end))
                    && !fired.contains(&observer.id)
            })
            .cloned()
            .collect();
    }

    fn process_time_observers(&self, current_time: Timestamp) {
        loop {
            let due = {
                let mut st = self.st.lock();
                match st.active_observers.last() {
                    Some(observer) if !observer.target_time.is_after(&current_time) => {
                        let observer = st.active_observers.pop();
                        if let Some(ref observer) = observer {
                            st.fired_this_session.insert(observer.id);
                        }
                        observer
                    }
                    _ => None,
                }
            };
            match due {
                Some(observer) => (observer.callback)(current_time),
                None => break,
            }
        }
    }

    // --- Display-refresh callback ----------------------------------------

    /**
        The per-vsync tap. Public so hosts with their own refresh source
        can drive the player directly.
    */
    pub fn display_link_tick(&self, host_time: Timestamp) {
        // An emptied queue while playing gets one recovery attempt by
        // re-inserting the last item.
        if self.engine.lock().items().is_empty() {
            let (is_playing, last_item) = {
                let st = self.st.lock();
                (st.is_playing, st.last_item.clone())
            };
            if is_playing {
                if let Some(item) = last_item {
                    debug!("player queue emptied while playing; re-inserting last item");
                    self.engine.lock().insert_after(item, None);
                }
            }
            return;
        }

        let Some(item) = self.engine.lock().current_item() else {
            return;
        };
        if item.status() != PlayerItemStatus::ReadyToPlay {
            return;
        }

        let current_time = self.engine.lock().current_time();
        if current_time.seconds() <= 0.0 {
            return;
        }

        if !item.has_new_pixel_buffer(host_time) {
            self.check_end_of_item(current_time);
            self.process_time_observers(current_time);
            return;
        }

        if self.is_processing.swap(true, Ordering::SeqCst) {
            trace!("display tick re-entered while processing");
            return;
        }

        if let Some(tapped) = item.copy_pixel_buffer(host_time) {
            if self.display_time_in_range(&tapped.display_time) {
                if let Some(framebuffer) = self.generator.generate_from_yuv(
                    &tapped.pixel_buffer,
                    tapped.display_time,
                    ImageOrientation::Portrait,
                ) {
                    framebuffer.set_user_info(Some(Arc::new(item.id())));
                    self.targets.update_targets(&framebuffer);
                }
            } else {
                trace!(
                    at = tapped.display_time.seconds(),
                    "tapped frame outside the loop range"
                );
            }
        }

        self.check_end_of_item(current_time);
        self.process_time_observers(current_time);
        self.is_processing.store(false, Ordering::SeqCst);
    }

    /// While looping, only display times within `[start, end)` are
    /// forwarded to subscribers.
    fn display_time_in_range(&self, display_time: &Timestamp) -> bool {
        let st = self.st.lock();
        if !st.loop_enabled {
            return true;
        }
        let Some(end) = st.actual_end_time else {
            return true;
        };
        !display_time.is_before(&st.actual_start_time) && display_time.is_before(&end)
    }

    /**
        The internal end-time observer: fires once per play session when
        play-time passes the range end, restarting the session in
        seek-on-end loop mode.
    */
    fn check_end_of_item(&self, current_time: Timestamp) {
        let restart = {
            let mut st = self.st.lock();
            match st.actual_end_time {
                Some(end) if current_time.is_after(&end) && !st.end_observer_fired => {
                    st.end_observer_fired = true;
                    st.loop_enabled && st.is_playing && st.looper.is_none()
                }
                _ => false,
            }
        };
        if restart {
            self.start();
        }
    }

    // --- Lifecycle -------------------------------------------------------

    /**
        Remove every engine subscription and stop the display link. Must
        be called before the player is dropped.
    */
    pub fn cleanup(&self) {
        self.engine.lock().clear_subscriptions();
        self.display_link.stop();
        self.st.lock().cleaned_up = true;
    }

    fn start_display_link(&self) {
        let weak = self.weak_self.clone();
        self.display_link.start(Arc::new(move |host_time| {
            if let Some(player) = weak.upgrade() {
                player.display_link_tick(host_time);
            }
        }));
    }

    fn should_defer_insert(&self) -> bool {
        let played_to_end_without_looper = {
            let st = self.st.lock();
            st.current_item_played_to_end && st.looper.is_none()
        };
        played_to_end_without_looper && self.engine.lock().items().len() == 1
    }

    fn handle_engine_event(&self, event: PlayerEvent) {
        match event {
            PlayerEvent::DidPlayToEnd { item } => {
                trace!(item, "item played to end");
                self.handle_did_play_to_end();
            }
            PlayerEvent::Stalled { item } => debug!(item, "playback stalled"),
            PlayerEvent::StatusChanged(status) => {
                if status == EngineStatus::ReadyToPlay {
                    self.pump_seek();
                }
            }
            PlayerEvent::RateChanged(rate) => trace!(rate, "engine rate changed"),
            PlayerEvent::ItemStatusChanged { item, status } => {
                trace!(item, ?status, "item status changed");
            }
        }
    }

    /**
        The did-play-to-end handler drains items whose insertion was
        deferred at the end-of-item boundary.
    */
    fn handle_did_play_to_end(&self) {
        let pending: Vec<_> = {
            let mut st = self.st.lock();
            st.current_item_played_to_end = true;
            st.pending_items.drain(..).collect()
        };
        if !pending.is_empty() {
            let mut engine = self.engine.lock();
            for item in pending {
                engine.insert_after(item, None);
            }
        }
    }
}

impl Drop for MoviePlayer {
    fn drop(&mut self) {
        if !self.st.lock().cleaned_up {
            warn!("movie player dropped without cleanup(); tearing down subscriptions");
            self.engine.lock().clear_subscriptions();
            self.display_link.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ItemEndAction;
    use crate::testing::{FakeEngineCore, FakeItem, ManualDisplayLink};
    use reel_core::{FrameConsumer, Framebuffer};
    use reel_types::Size;
    use std::sync::atomic::AtomicUsize;

    const SIZE: Size = Size::new(4, 4);

    struct CountingConsumer {
        received: AtomicUsize,
        display_times: Mutex<Vec<Timestamp>>,
    }

    impl CountingConsumer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: AtomicUsize::new(0),
                display_times: Mutex::new(Vec::new()),
            })
        }
    }

    impl FrameConsumer for CountingConsumer {
        fn new_framebuffer_available(&self, framebuffer: Arc<Framebuffer>, _source_index: usize) {
            self.received.fetch_add(1, Ordering::SeqCst);
            if let Some(at) = framebuffer.timing_style().timestamp() {
                self.display_times.lock().push(at);
            }
            framebuffer.unlock();
        }
    }

    fn make_player(
        config: MoviePlayerConfig,
    ) -> (Arc<MoviePlayer>, Arc<FakeEngineCore>, Arc<PipelineContext>) {
        let context = PipelineContext::new();
        let core = FakeEngineCore::new();
        let player = MoviePlayer::new(
            Arc::clone(&context),
            Arc::clone(&core).facade(),
            Arc::new(ManualDisplayLink),
            config,
        );
        (player, core, context)
    }

    fn seconds(value: i64) -> Timestamp {
        Timestamp::new(value * 600, 600)
    }

    #[test]
    fn rapid_seeks_coalesce_to_at_most_two_engine_seeks() {
        // Scenario: three requests in quick succession; the middle one is
        // superseded before the engine ever sees it.
        let (player, core, _context) = make_player(MoviePlayerConfig::default());

        player.seek_to_time(seconds(1), false);
        player.seek_to_time(seconds(2), false);
        player.seek_to_time(seconds(3), false);

        core.complete_next_seek();
        core.complete_next_seek();

        let issued = core.issued_seeks.lock().clone();
        assert!(issued.len() <= 2, "engine saw {} seeks", issued.len());
        assert_eq!(issued.first().map(|info| info.target_time), Some(seconds(1)));
        assert_eq!(issued.last().map(|info| info.target_time), Some(seconds(3)));
        assert_eq!(*core.current_time.lock(), seconds(3));
        assert_eq!(player.next_seeking(), None);
        assert_eq!(core.pending_seek_count(), 0);
        player.cleanup();
    }

    #[test]
    fn only_one_seek_is_in_flight_at_a_time() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());

        player.seek_to_time(seconds(1), false);
        player.seek_to_time(seconds(2), false);
        // The first seek has not completed; nothing further was issued.
        assert_eq!(core.issued_seeks.lock().len(), 1);
        core.complete_next_seek();
        assert_eq!(core.issued_seeks.lock().len(), 2);
        core.complete_next_seek();
        assert_eq!(player.next_seeking(), None);
        player.cleanup();
    }

    #[test]
    fn identical_follow_up_seek_is_not_reissued() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let info = SeekingInfo::exact(seconds(1), false);
        player.seek(info);
        player.seek(info);
        core.complete_next_seek();
        assert_eq!(core.issued_seeks.lock().len(), 1);
        assert_eq!(player.next_seeking(), None);
        player.cleanup();
    }

    #[test]
    fn seek_waits_for_engine_readiness() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        core.set_status(EngineStatus::Unknown);
        player.seek_to_time(seconds(2), false);
        assert_eq!(core.issued_seeks.lock().len(), 0);

        core.set_status(EngineStatus::ReadyToPlay);
        assert_eq!(core.issued_seeks.lock().len(), 1);
        core.complete_next_seek();
        player.cleanup();
    }

    #[test]
    fn loop_range_drops_out_of_range_tap_frames() {
        // Scenario: loop range [1, 2); display times outside it never
        // reach subscribers.
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let consumer = CountingConsumer::new();
        player
            .targets()
            .add_target(Arc::clone(&consumer) as Arc<dyn FrameConsumer>, 0);

        let item = FakeItem::new(1, SIZE, seconds(4));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);
        player.set_loop_enabled(
            true,
            Some(TimeRange::new(seconds(1), seconds(1))),
        );
        *core.current_time.lock() = Timestamp::from_seconds(1.5, 600);
        player.st.lock().is_playing = true;

        for display_seconds in [0.5, 1.5, 2.5] {
            item.push_frame(Timestamp::from_seconds(display_seconds, 600));
            player.display_link_tick(Timestamp::from_seconds(display_seconds, 1_000_000));
        }

        assert_eq!(item.copied.load(Ordering::SeqCst), 3);
        assert_eq!(consumer.received.load(Ordering::SeqCst), 1);
        let forwarded = consumer.display_times.lock().clone();
        assert_eq!(forwarded, vec![Timestamp::from_seconds(1.5, 600)]);
        player.cleanup();
    }

    #[test]
    fn time_observers_fire_once_per_session_in_order() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let item = FakeItem::new(1, SIZE, seconds(10));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);

        let order: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        for target in [2i64, 1, 3] {
            let order = Arc::clone(&order);
            player.add_time_observer(seconds(target), move |_current| {
                order.lock().push(target);
            });
        }

        player.start();
        core.complete_next_seek();

        // Play-time crosses all three targets at once.
        *core.current_time.lock() = Timestamp::from_seconds(3.5, 600);
        player.display_link_tick(seconds(1));
        assert_eq!(order.lock().clone(), vec![1, 2, 3]);

        // Idempotent within the session.
        player.display_link_tick(seconds(2));
        assert_eq!(order.lock().len(), 3);

        // A new session re-arms them.
        player.start();
        core.complete_next_seek();
        *core.current_time.lock() = Timestamp::from_seconds(3.5, 600);
        player.display_link_tick(seconds(3));
        assert_eq!(order.lock().len(), 6);
        player.cleanup();
    }

    #[test]
    fn active_queue_is_filtered_by_the_play_range() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let item = FakeItem::new(1, SIZE, seconds(10));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);
        player.set_loop_enabled(true, Some(TimeRange::new(seconds(1), seconds(2))));

        let fired: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        for target in [0.5, 1.5, 2.5, 3.5] {
            let fired = Arc::clone(&fired);
            player.add_time_observer(Timestamp::from_seconds(target, 600), move |_| {
                fired.lock().push(target);
            });
        }

        player.start();
        core.complete_next_seek();
        // Past the end of the range: everything eligible fires.
        *core.current_time.lock() = Timestamp::from_seconds(2.9, 600);
        player.display_link_tick(seconds(1));

        // 0.5 precedes the range and 3.5 follows it; neither fires.
        assert_eq!(fired.lock().clone(), vec![1.5, 2.5]);
        player.cleanup();
    }

    #[test]
    fn removed_observer_never_fires() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let item = FakeItem::new(1, SIZE, seconds(10));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = player.add_time_observer(seconds(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        player.start();
        core.complete_next_seek();
        player.remove_time_observer(handle);

        *core.current_time.lock() = seconds(2);
        player.display_link_tick(seconds(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        player.cleanup();
    }

    #[test]
    fn seek_on_end_looping_restarts_the_session() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let item = FakeItem::new(1, SIZE, seconds(4));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);
        player.set_loop_enabled(true, Some(TimeRange::new(seconds(1), seconds(1))));
        player.play();

        // Past the range end: the internal end observer fires once and
        // restarts via a seek back to the range start.
        *core.current_time.lock() = Timestamp::from_seconds(2.5, 600);
        player.display_link_tick(seconds(2));

        let issued = core.issued_seeks.lock().clone();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].target_time, seconds(1));
        assert!(issued[0].should_play_after_seek);

        // The end observer does not fire again within the session.
        player.display_link_tick(seconds(2));
        assert_eq!(core.issued_seeks.lock().len(), 1);
        player.cleanup();
    }

    #[test]
    fn engine_looper_suppresses_seek_on_end() {
        let (player, core, _context) = make_player(MoviePlayerConfig {
            should_use_looper: true,
        });
        core.supports_looper.store(true, Ordering::SeqCst);
        let item = FakeItem::new(1, SIZE, seconds(4));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);
        player.set_loop_enabled(true, Some(TimeRange::new(seconds(1), seconds(1))));
        player.play();

        *core.current_time.lock() = Timestamp::from_seconds(2.5, 600);
        player.display_link_tick(seconds(2));

        assert_eq!(core.issued_seeks.lock().len(), 0);
        player.cleanup();
    }

    #[test]
    fn insert_at_end_of_item_defers_until_the_notification() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let first = FakeItem::new(1, SIZE, seconds(4));
        player.replace_current_item(Arc::clone(&first) as Arc<dyn PlaybackItem>, true);
        assert_eq!(core.items.lock().len(), 1);

        // The sole item plays to its end.
        core.emit(PlayerEvent::DidPlayToEnd { item: 1 });

        // Inserting now must queue, not insert: the engine would strip
        // the item at this boundary.
        let second = FakeItem::new(2, SIZE, seconds(4));
        player.insert(Arc::clone(&second) as Arc<dyn PlaybackItem>, None, true);
        assert_eq!(core.items.lock().len(), 1);

        // The next did-play-to-end notification drains the queue.
        core.emit(PlayerEvent::DidPlayToEnd { item: 1 });
        assert_eq!(core.items.lock().len(), 2);
        player.cleanup();
    }

    #[test]
    fn emptied_queue_recovers_with_the_last_item() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let item = FakeItem::new(1, SIZE, seconds(4));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);
        player.play();

        // Something emptied the engine's queue behind our back.
        core.items.lock().clear();
        player.display_link_tick(seconds(1));

        let items = core.items.lock();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id(), 1);
        drop(items);
        player.cleanup();
    }

    #[test]
    fn tick_guards_against_reentrancy() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let item = FakeItem::new(1, SIZE, seconds(4));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);
        *core.current_time.lock() = seconds(1);
        item.push_frame(seconds(1));

        player.is_processing.store(true, Ordering::SeqCst);
        player.display_link_tick(seconds(1));
        // The frame was not consumed while the guard was held.
        assert_eq!(item.copied.load(Ordering::SeqCst), 0);

        player.is_processing.store(false, Ordering::SeqCst);
        player.display_link_tick(seconds(1));
        assert_eq!(item.copied.load(Ordering::SeqCst), 1);
        player.cleanup();
    }

    #[test]
    fn tap_toggles_per_item() {
        let (player, _core, _context) = make_player(MoviePlayerConfig::default());
        let tapped = FakeItem::new(1, SIZE, seconds(4));
        let untapped = FakeItem::new(2, SIZE, seconds(4));
        player.replace_current_item(Arc::clone(&tapped) as Arc<dyn PlaybackItem>, true);
        player.insert(Arc::clone(&untapped) as Arc<dyn PlaybackItem>, None, false);
        assert!(tapped.tap_is_enabled());
        assert!(!untapped.tap_is_enabled());
        player.cleanup();
    }

    #[test]
    fn cleanup_removes_engine_subscriptions() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        assert_eq!(core.observer_count(), 1);
        player.cleanup();
        assert_eq!(core.observer_count(), 0);

        // Events after cleanup are inert.
        core.emit(PlayerEvent::DidPlayToEnd { item: 9 });
    }

    #[test]
    fn zero_play_time_produces_no_frames() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        let item = FakeItem::new(1, SIZE, seconds(4));
        player.replace_current_item(Arc::clone(&item) as Arc<dyn PlaybackItem>, true);
        item.push_frame(Timestamp::zero());
        *core.current_time.lock() = Timestamp::zero();

        player.display_link_tick(seconds(1));
        assert_eq!(item.copied.load(Ordering::SeqCst), 0);
        player.cleanup();
    }

    #[test]
    fn engine_end_action_is_configurable() {
        let (player, core, _context) = make_player(MoviePlayerConfig::default());
        player.engine.lock().set_action_at_item_end(ItemEndAction::Pause);
        assert_eq!(*core.action_at_item_end.lock(), ItemEndAction::Pause);
        player.cleanup();
    }
}
