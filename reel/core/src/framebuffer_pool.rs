/*!
    Size-keyed framebuffer pool.
*/

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use reel_types::{ImageOrientation, Size};

use crate::framebuffer::Framebuffer;

/**
    Free lists of framebuffers keyed by logical size.

    Owned by the pipeline context and accessed from the image-processing
    queue; framebuffers re-enter the pool when their lock count reaches
    zero.
*/
pub struct FramebufferPool {
    free: Mutex<HashMap<(u32, u32), Vec<Arc<Framebuffer>>>>,
}

impl FramebufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(HashMap::new()),
        })
    }

    /**
        Hand out a framebuffer of the requested size, reusing an idle one
        when available. The returned handle is unlocked; producers lock it
        per consumer when distributing.
    */
    pub fn request(self: &Arc<Self>, size: Size, orientation: ImageOrientation) -> Arc<Framebuffer> {
        let reused = self
            .free
            .lock()
            .get_mut(&(size.width, size.height))
            .and_then(Vec::pop);
        match reused {
            Some(framebuffer) => {
                framebuffer.prepare_for_reuse(orientation);
                framebuffer
            }
            None => Framebuffer::create(size, orientation, Arc::downgrade(self)),
        }
    }

    pub(crate) fn reclaim(&self, framebuffer: Arc<Framebuffer>) {
        let size = framebuffer.size();
        self.free
            .lock()
            .entry((size.width, size.height))
            .or_default()
            .push(framebuffer);
    }

    /**
        Drop every idle framebuffer.
    */
    pub fn purge_all_unassigned(&self) {
        self.free.lock().clear();
    }

    /**
        Number of idle framebuffers across all sizes.
    */
    pub fn idle_count(&self) -> usize {
        self.free.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::TimingStyle;
    use reel_types::Timestamp;

    #[test]
    fn unlock_returns_framebuffer_to_pool() {
        let pool = FramebufferPool::new();
        let fb = pool.request(Size::new(8, 8), ImageOrientation::Portrait);
        assert_eq!(pool.idle_count(), 0);

        fb.lock();
        fb.unlock();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn reuse_matches_size_and_resets_metadata() {
        let pool = FramebufferPool::new();
        let fb = pool.request(Size::new(8, 8), ImageOrientation::LandscapeLeft);
        fb.set_timing_style(TimingStyle::VideoFrame(Timestamp::new(1, 30)));
        let id = fb.texture().id();
        fb.lock();
        fb.unlock();

        // A different size allocates fresh.
        let other = pool.request(Size::new(4, 4), ImageOrientation::Portrait);
        assert_ne!(other.texture().id(), id);
        assert_eq!(pool.idle_count(), 1);

        // The matching size reuses the pooled texture with clean metadata.
        let reused = pool.request(Size::new(8, 8), ImageOrientation::Portrait);
        assert_eq!(reused.texture().id(), id);
        assert_eq!(reused.orientation(), ImageOrientation::Portrait);
        assert_eq!(reused.timing_style(), TimingStyle::StillImage);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn purge_empties_free_lists() {
        let pool = FramebufferPool::new();
        let fb = pool.request(Size::new(8, 8), ImageOrientation::Portrait);
        fb.lock();
        fb.unlock();
        assert_eq!(pool.idle_count(), 1);
        pool.purge_all_unassigned();
        assert_eq!(pool.idle_count(), 0);
    }
}
