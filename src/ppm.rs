//! Minimal PPM (P6) reading and writing for the image slots.
//!
//! Only the fixed header form `P6\n<width> <height>\n255\n` followed by raw
//! 8-bit RGB triples, row-major top-to-bottom, is supported.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Dimension cap for loaded files, either side.
pub const MAX_DIM: u32 = 4096;

/// Appends a `.ppm` suffix unless the name already carries one.
pub fn with_ppm_ext(name: &str) -> PathBuf {
    if name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(".ppm") {
        PathBuf::from(name)
    } else {
        PathBuf::from(format!("{name}.ppm"))
    }
}

fn parse_dec(buf: &[u8], pos: &mut usize) -> Result<u32> {
    while *pos < buf.len() && buf[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    let start = *pos;
    while *pos < buf.len() && buf[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos == start {
        bail!("malformed PPM header");
    }
    let mut v: u32 = 0;
    for &b in &buf[start..*pos] {
        v = v
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as u32))
            .context("PPM header field overflows")?;
    }
    Ok(v)
}

/// Reads a P6 file. Returns `(width, height, rgb)` with `rgb` holding
/// `width * height * 3` bytes in top-to-bottom row order.
pub fn load(path: &Path) -> Result<(u32, u32, Vec<u8>)> {
    let buf = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    if buf.len() < 2 || &buf[..2] != b"P6" {
        bail!("{}: not a P6 bitmap", path.display());
    }

    let mut pos = 2;
    let width = parse_dec(&buf, &mut pos)?;
    let height = parse_dec(&buf, &mut pos)?;
    if width == 0 || width > MAX_DIM || height == 0 || height > MAX_DIM {
        bail!("{}: dimensions {}x{} out of range", path.display(), width, height);
    }
    let maxval = parse_dec(&buf, &mut pos)?;
    if maxval != 255 {
        bail!("{}: unsupported max value {}", path.display(), maxval);
    }
    // Exactly one whitespace byte separates the header from the pixel data.
    match buf.get(pos) {
        Some(b) if b.is_ascii_whitespace() => pos += 1,
        _ => bail!("{}: malformed PPM header", path.display()),
    }

    let len = width as usize * height as usize * 3;
    if buf.len() < pos + len {
        bail!("{}: truncated pixel data", path.display());
    }
    Ok((width, height, buf[pos..pos + len].to_vec()))
}

/// Writes a P6 file, pulling each top-to-bottom row from `fill_row`.
pub fn save(
    path: &Path,
    width: u32,
    height: u32,
    mut fill_row: impl FnMut(u32, &mut [u8]),
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write!(out, "P6\n{width} {height}\n255\n")?;

    let mut row = vec![0u8; width as usize * 3];
    for y in 0..height {
        fill_row(y, &mut row);
        out.write_all(&row)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> PathBuf {
        std::env::temp_dir().join(name)
    }

    #[test]
    fn round_trip_4x4() {
        let path = tmp("x11blit_ppm_rt.ppm");
        let pixels: Vec<u8> = (0..48).collect();
        save(&path, 4, 4, |y, row| {
            row.copy_from_slice(&pixels[y as usize * 12..y as usize * 12 + 12]);
        })
        .unwrap();

        let (w, h, data) = load(&path).unwrap();
        assert_eq!((w, h), (4, 4));
        assert_eq!(data, pixels);

        let raw = fs::read(&path).unwrap();
        assert!(raw.starts_with(b"P6\n4 4\n255\n"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_oversized_header() {
        let path = tmp("x11blit_ppm_big.ppm");
        fs::write(&path, b"P6\n5000 4\n255\n").unwrap();
        assert!(load(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_zero_dimension_and_bad_maxval() {
        let path = tmp("x11blit_ppm_bad.ppm");
        fs::write(&path, b"P6\n0 4\n255\n").unwrap();
        assert!(load(&path).is_err());
        fs::write(&path, b"P6\n4 4\n65535\n").unwrap();
        assert!(load(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_wrong_magic_and_short_data() {
        let path = tmp("x11blit_ppm_magic.ppm");
        fs::write(&path, b"P5\n4 4\n255\n").unwrap();
        assert!(load(&path).is_err());
        fs::write(&path, b"P6\n4 4\n255\nshort").unwrap();
        assert!(load(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_non_whitespace_header_terminator() {
        let path = tmp("x11blit_ppm_sep.ppm");
        let mut data = b"P6\n1 1\n255X".to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        fs::write(&path, &data).unwrap();
        assert!(load(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn extension_appended_once() {
        assert_eq!(with_ppm_ext("shot"), PathBuf::from("shot.ppm"));
        assert_eq!(with_ppm_ext("shot.PPM"), PathBuf::from("shot.PPM"));
        assert_eq!(with_ppm_ext("a.b"), PathBuf::from("a.b.ppm"));
    }
}
