//! Pixel formats and native format negotiation.
//!
//! The application picks one format from the closed set below and the
//! negotiator matches the server's visual (depth + channel masks + image byte
//! order) against the same set. Presentation converts between the two when
//! they differ.

use anyhow::{bail, Result};
use x11rb::protocol::xproto::ImageOrder;

/// Channel layout and order of one pixel. Names give the in-memory byte
/// sequence for the packed 24/32-bit formats; the 16-bit formats are packed
/// little-endian words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb555,
    Rgb565,
    Rgb24,
    Bgr24,
    Rgba32,
    Argb32,
    Abgr32,
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb555 | PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Rgba32
            | PixelFormat::Argb32
            | PixelFormat::Abgr32
            | PixelFormat::Bgra32 => 4,
        }
    }

    pub fn bits_per_pixel(self) -> usize {
        self.bytes_per_pixel() * 8
    }
}

/// Outcome of negotiating against the server's root visual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFormat {
    pub format: PixelFormat,
    /// Depth the window and PutImage requests are issued with.
    pub depth: u8,
    /// Bits per pixel on the wire (16 for the 555/565 visuals, 32 otherwise).
    pub bits_per_pixel: usize,
}

/// Match the display's visual against the supported format set.
///
/// Policy for the 24/32-bit depths: the green mask must be 0xFF00 and the
/// red/blue mask order narrows the choice to two channel orderings, one per
/// image byte order. The server's image byte order selects between them. The
/// raw protocol has no per-image byte swap (Xlib would do one), so the
/// application's preferred ordering can never override the server byte order;
/// an application that wants the zero-conversion present path requests the
/// format this function reports.
///
/// The 16-bit paths emit little-endian pixel words and therefore require an
/// LSB-first server.
pub fn negotiate(
    depth: u8,
    r_mask: u32,
    g_mask: u32,
    b_mask: u32,
    server_order: ImageOrder,
) -> Result<NativeFormat> {
    if depth < 15 || r_mask == 0 || g_mask == 0 || b_mask == 0 {
        bail!(
            "no compatible visual: need at least 15-bit TrueColor, got depth {} masks r={:#x} g={:#x} b={:#x}",
            depth,
            r_mask,
            g_mask,
            b_mask
        );
    }

    let lsb = server_order == ImageOrder::LSB_FIRST;

    let format = match depth {
        15 if r_mask == 0x7C00 && g_mask == 0x3E0 && b_mask == 0x1F && lsb => PixelFormat::Rgb555,
        16 if r_mask == 0xF800 && g_mask == 0x7E0 && b_mask == 0x1F && lsb => PixelFormat::Rgb565,
        24 | 32 if g_mask == 0xFF00 => {
            if r_mask == 0xFF && b_mask == 0xFF0000 {
                if lsb {
                    PixelFormat::Rgba32
                } else {
                    PixelFormat::Abgr32
                }
            } else if r_mask == 0xFF0000 && b_mask == 0xFF {
                if lsb {
                    PixelFormat::Bgra32
                } else {
                    PixelFormat::Argb32
                }
            } else {
                bail!(
                    "RGB masks not compatible with supported pixel formats: r={:#x} g={:#x} b={:#x}",
                    r_mask,
                    g_mask,
                    b_mask
                );
            }
        }
        _ => bail!(
            "RGB masks not compatible with supported pixel formats: depth {} r={:#x} g={:#x} b={:#x}",
            depth,
            r_mask,
            g_mask,
            b_mask
        ),
    };

    Ok(NativeFormat {
        format,
        depth,
        bits_per_pixel: if depth <= 16 { 16 } else { 32 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth24_lsb_picks_bgra() {
        let native = negotiate(
            24,
            0xFF0000,
            0xFF00,
            0xFF,
            ImageOrder::LSB_FIRST,
        )
        .unwrap();
        assert_eq!(native.format, PixelFormat::Bgra32);
        assert_eq!(native.bits_per_pixel, 32);
    }

    #[test]
    fn depth24_msb_picks_argb() {
        let native = negotiate(
            24,
            0xFF0000,
            0xFF00,
            0xFF,
            ImageOrder::MSB_FIRST,
        )
        .unwrap();
        assert_eq!(native.format, PixelFormat::Argb32);
    }

    #[test]
    fn swapped_masks_pick_rgba() {
        let native = negotiate(
            32,
            0xFF,
            0xFF00,
            0xFF0000,
            ImageOrder::LSB_FIRST,
        )
        .unwrap();
        assert_eq!(native.format, PixelFormat::Rgba32);
    }

    #[test]
    fn depth16_565() {
        let native = negotiate(
            16,
            0xF800,
            0x7E0,
            0x1F,
            ImageOrder::LSB_FIRST,
        )
        .unwrap();
        assert_eq!(native.format, PixelFormat::Rgb565);
        assert_eq!(native.bits_per_pixel, 16);
    }

    #[test]
    fn depth15_555() {
        let native = negotiate(
            15,
            0x7C00,
            0x3E0,
            0x1F,
            ImageOrder::LSB_FIRST,
        )
        .unwrap();
        assert_eq!(native.format, PixelFormat::Rgb555);
    }

    #[test]
    fn shallow_depth_fails() {
        assert!(negotiate(8, 0xE0, 0x1C, 0x3, ImageOrder::LSB_FIRST).is_err());
    }

    #[test]
    fn zero_mask_fails() {
        assert!(negotiate(24, 0, 0xFF00, 0xFF, ImageOrder::LSB_FIRST).is_err());
    }

    #[test]
    fn odd_masks_fail_deterministically() {
        for _ in 0..3 {
            let err = negotiate(
                24,
                0x3FF,
                0xFFC00,
                0x3FF00000,
                ImageOrder::LSB_FIRST,
            );
            assert!(err.is_err());
        }
    }
}
