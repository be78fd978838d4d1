/*!
    The seam between frame producers and the processing graph.

    The filter graph itself lives elsewhere; sources in this workspace
    only need somewhere to push framebuffers. Anything that accepts
    frames (a filter chain head, an encoder sink, a pre-roll cache)
    implements [`FrameConsumer`].
*/

use std::sync::Arc;

use parking_lot::Mutex;

use crate::framebuffer::Framebuffer;

/**
    A downstream receiver of framebuffers.

    Ownership contract: the producer takes one framebuffer lock per
    consumer before delivery; the consumer releases exactly one when it is
    done with the frame, on every path.
*/
pub trait FrameConsumer: Send + Sync {
    fn new_framebuffer_available(&self, framebuffer: Arc<Framebuffer>, source_index: usize);
}

/**
    The consumer registry held by each frame source.
*/
pub struct TargetList {
    targets: Mutex<Vec<(Arc<dyn FrameConsumer>, usize)>>,
}

impl TargetList {
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn add_target(&self, consumer: Arc<dyn FrameConsumer>, source_index: usize) {
        self.targets.lock().push((consumer, source_index));
    }

    pub fn remove_all_targets(&self) {
        self.targets.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.targets.lock().len()
    }

    /**
        Distribute a framebuffer to every registered consumer, taking one
        lock per delivery. With no consumers the framebuffer is cycled
        straight back to its pool.
    */
    pub fn update_targets(&self, framebuffer: &Arc<Framebuffer>) {
        let targets = self.targets.lock().clone();
        if targets.is_empty() {
            framebuffer.lock();
            framebuffer.unlock();
            return;
        }
        for (consumer, source_index) in targets {
            framebuffer.lock();
            consumer.new_framebuffer_available(Arc::clone(framebuffer), source_index);
        }
    }
}

impl Default for TargetList {
    fn default() -> Self {
        Self::new()
    }
}
