//! Owned pixel storage for the window and for auxiliary image slots.

use anyhow::{anyhow, Result};

use crate::format::PixelFormat;

/// A contiguous `width * height * bpp` byte region. Physical layout is always
/// top-to-bottom (what the server blits); when `flip_y` is set, logical row
/// addressing runs bottom-to-top instead. The orientation is fixed at
/// construction for the buffer's whole lifetime.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    flip_y: bool,
}

fn alloc(len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| anyhow!("frame buffer allocation of {len} bytes failed"))?;
    // Fresh surfaces start white, matching the window background.
    data.resize(len, 0xFF);
    Ok(data)
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat, flip_y: bool) -> Result<Self> {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Ok(Self {
            data: alloc(len)?,
            width,
            height,
            format,
            flip_y,
        })
    }

    /// Reallocates to the new dimensions. Previous content is discarded; the
    /// buffer comes back as a fresh white surface.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let len = width as usize * height as usize * self.format.bytes_per_pixel();
        self.data = alloc(len)?;
        self.width = width;
        self.height = height;
        Ok(())
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

    pub fn flip_y(&self) -> bool {
        self.flip_y
    }

    /// Bytes per row.
    pub fn row_len(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    fn phys(&self, y: u32) -> usize {
        let y = if self.flip_y { self.height - 1 - y } else { y };
        y as usize * self.row_len()
    }

    /// Logical row `y`, flip-aware.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = self.phys(y);
        &self.data[start..start + self.row_len()]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = self.phys(y);
        let len = self.row_len();
        &mut self.data[start..start + len]
    }

    /// The raw storage in physical (server) row order.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_reallocates_exactly() {
        let mut buf = FrameBuffer::new(10, 10, PixelFormat::Bgra32, false).unwrap();
        buf.bytes_mut().fill(0);
        buf.resize(33, 7).unwrap();
        assert_eq!(buf.bytes().len(), 33 * 7 * 4);
        // Fresh surface, nothing preserved.
        assert!(buf.bytes().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn flipped_rows_address_bottom_up() {
        let mut buf = FrameBuffer::new(2, 3, PixelFormat::Rgb24, true).unwrap();
        buf.row_mut(0).fill(1);
        buf.row_mut(2).fill(3);
        // Logical row 0 lands at the physical bottom.
        assert!(buf.bytes()[12..18].iter().all(|&b| b == 1));
        assert!(buf.bytes()[0..6].iter().all(|&b| b == 3));
    }

    #[test]
    fn unflipped_rows_address_top_down() {
        let mut buf = FrameBuffer::new(2, 2, PixelFormat::Rgb565, false).unwrap();
        buf.row_mut(0).fill(9);
        assert!(buf.bytes()[..4].iter().all(|&b| b == 9));
    }
}
