/*!
    Host-visible pixel buffers and their pool.
*/

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use reel_types::{ColorAttachments, PixelFormat, Size};

/**
    Planar or interleaved image memory.

    Buffers are handed out by a [`PixelBufferPool`]; dropping a buffer
    returns its storage to the pool that allocated it.
*/
pub struct PixelBuffer {
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: Vec<Vec<u8>>,
    attachments: Option<ColorAttachments>,
    pool: Weak<PixelBufferPool>,
}

impl PixelBuffer {
    /**
        Allocate a standalone buffer that is not attached to a pool.
    */
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            format,
            width,
            height,
            planes: allocate_planes(width, height, format),
            attachments: None,
            pool: Weak::new(),
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> &[u8] {
        &self.planes[index]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.planes[index]
    }

    pub fn bytes_per_row(&self, plane: usize) -> usize {
        plane_row_bytes(self.width, self.format, plane)
    }

    /**
        Attach color metadata. The first call wins; the metadata is set
        once per buffer and propagated downstream.
    */
    pub fn set_attachments(&mut self, attachments: ColorAttachments) {
        if self.attachments.is_none() {
            self.attachments = Some(attachments);
        }
    }

    pub fn attachments(&self) -> Option<&ColorAttachments> {
        self.attachments.as_ref()
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(std::mem::take(&mut self.planes));
        }
    }
}

fn allocate_planes(width: u32, height: u32, format: PixelFormat) -> Vec<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let chroma_w = w.div_ceil(2);
    let chroma_h = h.div_ceil(2);
    match format {
        PixelFormat::Yuv420p => vec![
            vec![0; w * h],
            vec![0; chroma_w * chroma_h],
            vec![0; chroma_w * chroma_h],
        ],
        PixelFormat::Nv12 => vec![vec![0; w * h], vec![0; chroma_w * 2 * chroma_h]],
        PixelFormat::Bgra | PixelFormat::Rgba => vec![vec![0; w * h * 4]],
        _ => unreachable!("unknown PixelFormat variant"),
    }
}

fn plane_row_bytes(width: u32, format: PixelFormat, plane: usize) -> usize {
    let w = width as usize;
    let chroma_w = w.div_ceil(2);
    match (format, plane) {
        (PixelFormat::Yuv420p, 0) | (PixelFormat::Nv12, 0) => w,
        (PixelFormat::Yuv420p, _) => chroma_w,
        (PixelFormat::Nv12, _) => chroma_w * 2,
        (PixelFormat::Bgra | PixelFormat::Rgba, _) => w * 4,
        (_, _) => unreachable!("unknown PixelFormat variant"),
    }
}

/**
    Fixed-geometry pool of pixel buffers keyed on width, height, and
    format.

    A minimum number of buffers is pre-allocated up front; once the total
    allocation reaches `capacity`, [`try_acquire`](Self::try_acquire)
    returns `None` and the caller is expected to drop the frame
    (back-pressure).

    The pool itself performs no external synchronization beyond its free
    list; the encoder-side pool is additionally guarded by the movie
    output's semaphore because allocation must not race writer
    cancellation.
*/
pub struct PixelBufferPool {
    width: u32,
    height: u32,
    format: PixelFormat,
    capacity: usize,
    free: Mutex<Vec<Vec<Vec<u8>>>>,
    allocated: AtomicUsize,
    weak_self: Weak<PixelBufferPool>,
}

impl PixelBufferPool {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        min_preallocated: usize,
        capacity: usize,
    ) -> Arc<Self> {
        let capacity = capacity.max(min_preallocated).max(1);
        let pool = Arc::new_cyclic(|weak_self| Self {
            width,
            height,
            format,
            capacity,
            free: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(min_preallocated),
            weak_self: weak_self.clone(),
        });
        let mut free = pool.free.lock();
        for _ in 0..min_preallocated {
            free.push(allocate_planes(width, height, format));
        }
        drop(free);
        pool
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /**
        Hand out a buffer, reusing idle storage when available. `None`
        when the pool is exhausted.
    */
    pub fn try_acquire(&self) -> Option<PixelBuffer> {
        let planes = {
            let mut free = self.free.lock();
            match free.pop() {
                Some(planes) => Some(planes),
                None => {
                    // All pre-allocated storage is in flight; grow until
                    // the cap.
                    let grown = self
                        .allocated
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            (n < self.capacity).then_some(n + 1)
                        })
                        .is_ok();
                    grown.then(|| allocate_planes(self.width, self.height, self.format))
                }
            }
        }?;
        Some(PixelBuffer {
            format: self.format,
            width: self.width,
            height: self.height,
            planes,
            attachments: None,
            pool: self.weak_self.clone(),
        })
    }

    fn recycle(&self, planes: Vec<Vec<u8>>) {
        self.free.lock().push(planes);
    }

    /**
        Number of idle buffers currently in the free list.
    */
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }
}
