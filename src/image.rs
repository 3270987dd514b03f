//! Numbered off-screen image slots backed by [`FrameBuffer`]s.
//!
//! Slots hold auxiliary images in the window's pixel format so the demo code
//! can blit between them and the window surface without conversions. Files on
//! disk are always 24-bit PPM; loading and saving converts through the row
//! dispatch in [`crate::convert`].

use std::path::Path;

use anyhow::Result;
use log::warn;

use crate::buffer::FrameBuffer;
use crate::convert::row_converter;
use crate::format::PixelFormat;
use crate::ppm;

/// Number of image slots available per window.
pub const MAX_IMAGES: usize = 16;

pub struct ImageSlots {
    slots: [Option<FrameBuffer>; MAX_IMAGES],
    format: PixelFormat,
    flip_y: bool,
}

impl ImageSlots {
    pub fn new(format: PixelFormat, flip_y: bool) -> Self {
        Self {
            slots: Default::default(),
            format,
            flip_y,
        }
    }

    pub fn get(&self, idx: usize) -> Option<&FrameBuffer> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut FrameBuffer> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    /// Allocates (or reallocates) slot `idx` to the given size. Existing
    /// content is discarded.
    pub fn create(&mut self, idx: usize, width: u32, height: u32) -> Result<()> {
        anyhow::ensure!(idx < MAX_IMAGES, "image slot {idx} out of range");
        self.slots[idx] = Some(FrameBuffer::new(width, height, self.format, self.flip_y)?);
        Ok(())
    }

    pub fn destroy(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = None;
        }
    }

    /// Loads a P6 file into slot `idx`, converting to the window format.
    /// Returns `false` on any failure, leaving the slot untouched.
    pub fn load(&mut self, idx: usize, name: &str) -> bool {
        if idx >= MAX_IMAGES {
            warn!("image slot {idx} out of range");
            return false;
        }
        let path = ppm::with_ppm_ext(name);
        match self.load_inner(&path) {
            Ok(buf) => {
                self.slots[idx] = Some(buf);
                true
            }
            Err(err) => {
                warn!("loading {}: {err:#}", path.display());
                false
            }
        }
    }

    fn load_inner(&self, path: &Path) -> Result<FrameBuffer> {
        let (width, height, rgb) = ppm::load(path)?;
        let mut buf = FrameBuffer::new(width, height, self.format, self.flip_y)?;
        // The file is top-to-bottom, matching the buffer's physical layout.
        let conv = row_converter(PixelFormat::Rgb24, self.format);
        let src_len = width as usize * 3;
        let dst_len = buf.row_len();
        for (dst, src) in buf
            .bytes_mut()
            .chunks_exact_mut(dst_len)
            .zip(rgb.chunks_exact(src_len))
        {
            conv(dst, src, width as usize);
        }
        Ok(buf)
    }

    /// Saves slot `idx` as a P6 file. Returns `false` on any failure.
    pub fn save(&self, idx: usize, name: &str) -> bool {
        let Some(buf) = self.get(idx) else {
            warn!("image slot {idx} is empty, nothing to save");
            return false;
        };
        let path = ppm::with_ppm_ext(name);
        let conv = row_converter(self.format, PixelFormat::Rgb24);
        let row_len = buf.row_len();
        let bytes = buf.bytes();
        let res = ppm::save(&path, buf.width(), buf.height(), |y, out| {
            let start = y as usize * row_len;
            conv(out, &bytes[start..start + row_len], buf.width() as usize);
        });
        match res {
            Ok(()) => true,
            Err(err) => {
                warn!("saving {}: {err:#}", path.display());
                false
            }
        }
    }

    /// Snapshots the window surface into slot `idx`.
    pub fn copy_from_window(&mut self, idx: usize, window: &FrameBuffer) -> bool {
        if idx >= MAX_IMAGES {
            warn!("image slot {idx} out of range");
            return false;
        }
        match self.create(idx, window.width(), window.height()) {
            Ok(()) => {}
            Err(err) => {
                warn!("snapshot into slot {idx}: {err:#}");
                return false;
            }
        }
        if let Some(img) = self.slots[idx].as_mut() {
            img.bytes_mut().copy_from_slice(window.bytes());
        }
        true
    }

    /// Blits slot `idx` onto the window surface, clipped to the smaller of
    /// the two sizes.
    pub fn copy_to_window(&self, idx: usize, window: &mut FrameBuffer) -> bool {
        let Some(img) = self.get(idx) else {
            return false;
        };
        let rows = img.height().min(window.height());
        let cols = img.width().min(window.width()) as usize * self.format.bytes_per_pixel();
        for y in 0..rows {
            window.row_mut(y)[..cols].copy_from_slice(&img.row(y)[..cols]);
        }
        true
    }
}
