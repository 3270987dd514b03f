//! Row-oriented pixel transcoding between the supported formats.
//!
//! Every (source, destination) pair out of the 8x8 format matrix has exactly
//! one conversion routine. The dispatch is two nested exhaustive matches over
//! [`PixelFormat`], so a format added to the enum without a matching codec
//! fails to compile rather than silently falling through.

use anyhow::Result;

use crate::buffer::FrameBuffer;
use crate::format::PixelFormat;
use crate::rect::Rect;

/// Converts `width` pixels from `src` into `dst`.
pub type RowFn = fn(dst: &mut [u8], src: &[u8], width: usize);

/// Fixed-width decode to 8-bit RGBA and encode back. Narrowing encodes
/// truncate by mask-and-shift; decodes do not replicate low bits. The result
/// is a deterministic function of the two formats involved.
trait Codec {
    const BPP: usize;
    fn decode(px: &[u8]) -> [u8; 4];
    fn encode(px: &mut [u8], c: [u8; 4]);
}

struct Rgb555;
struct Rgb565;
struct Rgb24;
struct Bgr24;
struct Rgba32;
struct Argb32;
struct Abgr32;
struct Bgra32;

impl Codec for Rgb555 {
    const BPP: usize = 2;
    fn decode(px: &[u8]) -> [u8; 4] {
        let v = u16::from_le_bytes([px[0], px[1]]);
        [
            ((v >> 7) & 0xF8) as u8,
            ((v >> 2) & 0xF8) as u8,
            ((v << 3) & 0xF8) as u8,
            255,
        ]
    }
    fn encode(px: &mut [u8], [r, g, b, _]: [u8; 4]) {
        let v = ((r as u16 & 0xF8) << 7) | ((g as u16 & 0xF8) << 2) | (b as u16 >> 3);
        px.copy_from_slice(&v.to_le_bytes());
    }
}

impl Codec for Rgb565 {
    const BPP: usize = 2;
    fn decode(px: &[u8]) -> [u8; 4] {
        let v = u16::from_le_bytes([px[0], px[1]]);
        [
            ((v >> 8) & 0xF8) as u8,
            ((v >> 3) & 0xFC) as u8,
            ((v << 3) & 0xF8) as u8,
            255,
        ]
    }
    fn encode(px: &mut [u8], [r, g, b, _]: [u8; 4]) {
        let v = ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3);
        px.copy_from_slice(&v.to_le_bytes());
    }
}

impl Codec for Rgb24 {
    const BPP: usize = 3;
    fn decode(px: &[u8]) -> [u8; 4] {
        [px[0], px[1], px[2], 255]
    }
    fn encode(px: &mut [u8], [r, g, b, _]: [u8; 4]) {
        px.copy_from_slice(&[r, g, b]);
    }
}

impl Codec for Bgr24 {
    const BPP: usize = 3;
    fn decode(px: &[u8]) -> [u8; 4] {
        [px[2], px[1], px[0], 255]
    }
    fn encode(px: &mut [u8], [r, g, b, _]: [u8; 4]) {
        px.copy_from_slice(&[b, g, r]);
    }
}

impl Codec for Rgba32 {
    const BPP: usize = 4;
    fn decode(px: &[u8]) -> [u8; 4] {
        [px[0], px[1], px[2], px[3]]
    }
    fn encode(px: &mut [u8], c: [u8; 4]) {
        px.copy_from_slice(&c);
    }
}

impl Codec for Argb32 {
    const BPP: usize = 4;
    fn decode(px: &[u8]) -> [u8; 4] {
        [px[1], px[2], px[3], px[0]]
    }
    fn encode(px: &mut [u8], [r, g, b, a]: [u8; 4]) {
        px.copy_from_slice(&[a, r, g, b]);
    }
}

impl Codec for Abgr32 {
    const BPP: usize = 4;
    fn decode(px: &[u8]) -> [u8; 4] {
        [px[3], px[2], px[1], px[0]]
    }
    fn encode(px: &mut [u8], [r, g, b, a]: [u8; 4]) {
        px.copy_from_slice(&[a, b, g, r]);
    }
}

impl Codec for Bgra32 {
    const BPP: usize = 4;
    fn decode(px: &[u8]) -> [u8; 4] {
        [px[2], px[1], px[0], px[3]]
    }
    fn encode(px: &mut [u8], [r, g, b, a]: [u8; 4]) {
        px.copy_from_slice(&[b, g, r, a]);
    }
}

fn convert_row<S: Codec, D: Codec>(dst: &mut [u8], src: &[u8], width: usize) {
    for (d, s) in dst
        .chunks_exact_mut(D::BPP)
        .zip(src.chunks_exact(S::BPP))
        .take(width)
    {
        D::encode(d, S::decode(s));
    }
}

fn copy_row<F: Codec>(dst: &mut [u8], src: &[u8], width: usize) {
    let n = width * F::BPP;
    dst[..n].copy_from_slice(&src[..n]);
}

fn from_src<D: Codec>(src: PixelFormat) -> RowFn {
    match src {
        PixelFormat::Rgb555 => convert_row::<Rgb555, D>,
        PixelFormat::Rgb565 => convert_row::<Rgb565, D>,
        PixelFormat::Rgb24 => convert_row::<Rgb24, D>,
        PixelFormat::Bgr24 => convert_row::<Bgr24, D>,
        PixelFormat::Rgba32 => convert_row::<Rgba32, D>,
        PixelFormat::Argb32 => convert_row::<Argb32, D>,
        PixelFormat::Abgr32 => convert_row::<Abgr32, D>,
        PixelFormat::Bgra32 => convert_row::<Bgra32, D>,
    }
}

/// Look up the conversion routine for a (source, destination) pair. The
/// diagonal degenerates to a raw byte copy.
pub fn row_converter(src: PixelFormat, dst: PixelFormat) -> RowFn {
    if src == dst {
        return match src {
            PixelFormat::Rgb555 => copy_row::<Rgb555>,
            PixelFormat::Rgb565 => copy_row::<Rgb565>,
            PixelFormat::Rgb24 => copy_row::<Rgb24>,
            PixelFormat::Bgr24 => copy_row::<Bgr24>,
            PixelFormat::Rgba32 => copy_row::<Rgba32>,
            PixelFormat::Argb32 => copy_row::<Argb32>,
            PixelFormat::Abgr32 => copy_row::<Abgr32>,
            PixelFormat::Bgra32 => copy_row::<Bgra32>,
        };
    }
    match dst {
        PixelFormat::Rgb555 => from_src::<Rgb555>(src),
        PixelFormat::Rgb565 => from_src::<Rgb565>(src),
        PixelFormat::Rgb24 => from_src::<Rgb24>(src),
        PixelFormat::Bgr24 => from_src::<Bgr24>(src),
        PixelFormat::Rgba32 => from_src::<Rgba32>(src),
        PixelFormat::Argb32 => from_src::<Argb32>(src),
        PixelFormat::Abgr32 => from_src::<Abgr32>(src),
        PixelFormat::Bgra32 => from_src::<Bgra32>(src),
    }
}

/// Converts the whole of `src` into `dst`. Both buffers keep their own row
/// orientation; rows are addressed logically on each side.
///
/// # Panics
///
/// Panics when the two buffers disagree on dimensions.
pub fn convert_full(dst: &mut FrameBuffer, src: &FrameBuffer) {
    assert_eq!((dst.width(), dst.height()), (src.width(), src.height()));
    let conv = row_converter(src.format(), dst.format());
    let w = src.width() as usize;
    for y in 0..src.height() {
        conv(dst.row_mut(y), src.row(y), w);
    }
}

/// Transcodes the sub-rectangle `r` of `src` into a fresh buffer of format
/// `dst_format` with the same orientation. `r` must lie within bounds.
pub fn convert_region(
    src: &FrameBuffer,
    r: Rect,
    dst_format: PixelFormat,
) -> Result<FrameBuffer> {
    let mut dst = FrameBuffer::new(r.width(), r.height(), dst_format, src.flip_y())?;
    let conv = row_converter(src.format(), dst_format);
    let bpp = src.format().bytes_per_pixel();
    let (x1, x2) = (r.x1 as usize * bpp, r.x2 as usize * bpp);
    let w = r.width() as usize;
    for i in 0..r.height() {
        let sy = r.y1 as u32 + i;
        conv(dst.row_mut(i), &src.row(sy)[x1..x2], w);
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMATS: [PixelFormat; 8] = [
        PixelFormat::Rgb555,
        PixelFormat::Rgb565,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Rgba32,
        PixelFormat::Argb32,
        PixelFormat::Abgr32,
        PixelFormat::Bgra32,
    ];

    fn sample_row(fmt: PixelFormat, width: usize) -> Vec<u8> {
        // Channel values on 8-bit boundaries survive 5/6-bit truncation.
        let mut row = vec![0u8; width * fmt.bytes_per_pixel()];
        let rgb24: Vec<u8> = (0..width)
            .flat_map(|i| [(i as u8) << 3, 0x40, 0x80])
            .collect();
        row_converter(PixelFormat::Rgb24, fmt)(&mut row, &rgb24, width);
        row
    }

    #[test]
    fn every_pair_converts() {
        for src in FORMATS {
            for dst in FORMATS {
                let conv = row_converter(src, dst);
                let input = sample_row(src, 7);
                let mut out = vec![0u8; 7 * dst.bytes_per_pixel()];
                conv(&mut out, &input, 7);
            }
        }
    }

    #[test]
    fn same_width_reordering_round_trips_losslessly() {
        let pairs = [
            (PixelFormat::Rgba32, PixelFormat::Bgra32),
            (PixelFormat::Rgba32, PixelFormat::Argb32),
            (PixelFormat::Bgra32, PixelFormat::Abgr32),
            (PixelFormat::Rgb24, PixelFormat::Bgr24),
        ];
        for (a, b) in pairs {
            let input = sample_row(a, 16);
            let mut mid = vec![0u8; 16 * b.bytes_per_pixel()];
            let mut back = vec![0u8; 16 * a.bytes_per_pixel()];
            row_converter(a, b)(&mut mid, &input, 16);
            row_converter(b, a)(&mut back, &mid, 16);
            assert_eq!(back, input, "{:?} <-> {:?}", a, b);
        }
    }

    #[test]
    fn narrowing_round_trip_truncates() {
        // 0x84 loses its low bits through a 5-bit channel.
        let input = [0x84u8, 0x23, 0xF1, 0xFF];
        let mut mid = [0u8; 2];
        let mut back = [0u8; 4];
        row_converter(PixelFormat::Rgba32, PixelFormat::Rgb555)(&mut mid, &input, 1);
        row_converter(PixelFormat::Rgb555, PixelFormat::Rgba32)(&mut back, &mid, 1);
        assert_eq!(back, [0x80, 0x20, 0xF0, 0xFF]);
    }

    #[test]
    fn identity_is_a_byte_copy() {
        for fmt in FORMATS {
            let input = sample_row(fmt, 9);
            let mut out = vec![0u8; input.len()];
            row_converter(fmt, fmt)(&mut out, &input, 9);
            assert_eq!(out, input);
        }
    }

    #[test]
    fn rgb565_keeps_six_green_bits() {
        let input = [0x00u8, 0xFC, 0x00];
        let mut packed = [0u8; 2];
        let mut back = [0u8; 3];
        row_converter(PixelFormat::Rgb24, PixelFormat::Rgb565)(&mut packed, &input, 1);
        row_converter(PixelFormat::Rgb565, PixelFormat::Rgb24)(&mut back, &packed, 1);
        assert_eq!(back, input);
    }

    #[test]
    fn convert_region_respects_flip() {
        // 4x4 bgra source, bottom-up rows; take the top-left 2x2.
        let mut src = FrameBuffer::new(4, 4, PixelFormat::Bgra32, true).unwrap();
        for y in 0..4u32 {
            for x in 0..4usize {
                let px = &mut src.row_mut(y)[x * 4..x * 4 + 4];
                px.copy_from_slice(&[x as u8 * 8, y as u8 * 8, 0, 255]);
            }
        }
        let out = convert_region(&src, Rect::new(0, 0, 2, 2), PixelFormat::Rgba32).unwrap();
        assert_eq!((out.width(), out.height()), (2, 2));
        // Logical (1, 1) carried over with channels swapped.
        assert_eq!(&out.row(1)[4..8], &[0, 8, 8, 255]);
    }
}
