/*!
    Reference-counted framebuffer handles.
*/

use std::any::Any;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use reel_types::{ImageOrientation, Size, Timestamp};

use crate::framebuffer_pool::FramebufferPool;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/**
    The backing texture of a framebuffer.

    The device texture itself is out of scope here; what the pipeline
    needs is an addressable RGBA8 store that the color-conversion and
    swizzle passes read and write, identified stably across pool reuse.
*/
pub struct Texture {
    id: u64,
    size: Size,
    data: Mutex<Vec<u8>>,
}

impl Texture {
    fn new(size: Size) -> Self {
        let byte_len = size.width as usize * size.height as usize * 4;
        Self {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            size,
            data: Mutex::new(vec![0; byte_len]),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> Size {
        self.size
    }
}

/**
    How a framebuffer relates to presentation time.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimingStyle {
    /// Content with no timeline position (a still, a generated pattern).
    StillImage,
    /// One frame of video at the given presentation time.
    VideoFrame(Timestamp),
}

impl TimingStyle {
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::StillImage => None,
            Self::VideoFrame(time) => Some(*time),
        }
    }
}

/// Opaque per-frame payload attached by producers and read by consumers.
pub type UserInfo = Arc<dyn Any + Send + Sync>;

/**
    A reference-counted handle to a pooled texture with presentation
    metadata.

    A framebuffer is *locked* while any consumer may still read it; each
    producer takes one lock per consumer it hands the frame to, and each
    consumer releases exactly one. When the count returns to zero the
    framebuffer re-enters its size-keyed pool. The count must balance on
    every path, error paths included.
*/
pub struct Framebuffer {
    size: Size,
    texture: Texture,
    orientation: Mutex<ImageOrientation>,
    timing_style: Mutex<TimingStyle>,
    user_info: Mutex<Option<UserInfo>>,
    lock_count: AtomicI32,
    pool: Weak<FramebufferPool>,
    weak_self: Weak<Framebuffer>,
}

impl Framebuffer {
    pub(crate) fn create(
        size: Size,
        orientation: ImageOrientation,
        pool: Weak<FramebufferPool>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            size,
            texture: Texture::new(size),
            orientation: Mutex::new(orientation),
            timing_style: Mutex::new(TimingStyle::StillImage),
            user_info: Mutex::new(None),
            lock_count: AtomicI32::new(0),
            pool,
            weak_self: weak_self.clone(),
        })
    }

    /// Reset per-frame metadata when the framebuffer leaves the pool.
    pub(crate) fn prepare_for_reuse(&self, orientation: ImageOrientation) {
        *self.orientation.lock() = orientation;
        *self.timing_style.lock() = TimingStyle::StillImage;
        *self.user_info.lock() = None;
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn orientation(&self) -> ImageOrientation {
        *self.orientation.lock()
    }

    pub fn set_orientation(&self, orientation: ImageOrientation) {
        *self.orientation.lock() = orientation;
    }

    pub fn timing_style(&self) -> TimingStyle {
        *self.timing_style.lock()
    }

    pub fn set_timing_style(&self, style: TimingStyle) {
        *self.timing_style.lock() = style;
    }

    pub fn user_info(&self) -> Option<UserInfo> {
        self.user_info.lock().clone()
    }

    pub fn set_user_info(&self, info: Option<UserInfo>) {
        *self.user_info.lock() = info;
    }

    /**
        Replace the texture contents. `pixels` must be RGBA8 of exactly
        `width * height * 4` bytes.
    */
    pub fn write_pixels(&self, pixels: Vec<u8>) {
        let expected = self.size.width as usize * self.size.height as usize * 4;
        debug_assert_eq!(pixels.len(), expected, "framebuffer pixel upload size");
        *self.texture.data.lock() = pixels;
    }

    /**
        Copy the texture contents out (synchronous read-back).
    */
    pub fn read_pixels(&self) -> Vec<u8> {
        self.texture.data.lock().clone()
    }

    pub fn lock_count(&self) -> i32 {
        self.lock_count.load(Ordering::SeqCst)
    }

    /**
        Take a read lock on the framebuffer.
    */
    pub fn lock(&self) {
        self.lock_count.fetch_add(1, Ordering::SeqCst);
    }

    /**
        Release one read lock. At zero the framebuffer returns to its
        pool.
    */
    pub fn unlock(&self) {
        let previous = self.lock_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "unbalanced framebuffer unlock");
        if previous == 1 {
            if let (Some(pool), Some(this)) = (self.pool.upgrade(), self.weak_self.upgrade()) {
                pool.reclaim(this);
            } else {
                debug!(texture = self.texture.id, "framebuffer outlived its pool");
            }
        }
    }
}
