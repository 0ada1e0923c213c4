// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The framebuffer memory and its pixel encodings.

use nexus_abi::Errno;
use serde::Deserialize;

/// Pixel encodings a framebuffer may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visual {
    /// 8-bit indirect colour, RGB 3:2:3 (inverted).
    Indirect8,
    /// 16-bit RGB 5:5:5.
    Rgb555,
    /// 16-bit RGB 5:6:5.
    Rgb565,
    /// 24-bit RGB 8:8:8.
    Rgb888,
    /// 32-bit RGB 8:8:8 with a trailing pad byte.
    Rgb8880,
    /// 32-bit RGB 8:8:8 with a leading pad byte.
    Rgb0888,
    /// 32-bit BGR 8:8:8 with a leading pad byte.
    Bgr0888,
}

const fn red(rgb: u32, bits: u32) -> u32 {
    (rgb >> (24 - bits)) & ((1 << bits) - 1)
}

const fn green(rgb: u32, bits: u32) -> u32 {
    (rgb >> (16 - bits)) & ((1 << bits) - 1)
}

const fn blue(rgb: u32, bits: u32) -> u32 {
    (rgb >> (8 - bits)) & ((1 << bits) - 1)
}

impl Visual {
    /// Bytes per pixel.
    pub const fn pixel_bytes(self) -> usize {
        match self {
            Self::Indirect8 => 1,
            Self::Rgb555 | Self::Rgb565 => 2,
            Self::Rgb888 => 3,
            Self::Rgb8880 | Self::Rgb0888 | Self::Bgr0888 => 4,
        }
    }

    /// Encodes `0xRRGGBB` into `dst`, which must hold exactly one pixel.
    pub fn encode(self, rgb: u32, dst: &mut [u8]) {
        match self {
            Self::Indirect8 => {
                let packed = (red(rgb, 3) << 5) | (green(rgb, 2) << 3) | blue(rgb, 3);
                dst[0] = !(packed as u8);
            }
            Self::Rgb555 => {
                let packed = (red(rgb, 5) << 10) | (green(rgb, 5) << 5) | blue(rgb, 5);
                dst.copy_from_slice(&(packed as u16).to_le_bytes());
            }
            Self::Rgb565 => {
                let packed = (red(rgb, 5) << 11) | (green(rgb, 6) << 5) | blue(rgb, 5);
                dst.copy_from_slice(&(packed as u16).to_le_bytes());
            }
            Self::Rgb888 => dst.copy_from_slice(&(rgb & 0xff_ffff).to_le_bytes()[..3]),
            Self::Rgb8880 => dst.copy_from_slice(&((rgb & 0xff_ffff) << 8).to_le_bytes()),
            Self::Rgb0888 => dst.copy_from_slice(&(rgb & 0xff_ffff).to_le_bytes()),
            Self::Bgr0888 => {
                let swapped = (blue(rgb, 8) << 16) | (green(rgb, 8) << 8) | red(rgb, 8);
                dst.copy_from_slice(&swapped.to_le_bytes());
            }
        }
    }

    /// Encodes `0xRRGGBB` into a freshly allocated pixel.
    pub fn pixel(self, rgb: u32) -> Vec<u8> {
        let mut out = vec![0; self.pixel_bytes()];
        self.encode(rgb, &mut out);
        out
    }
}

/// Axis-aligned rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: usize,
    /// Top edge.
    pub y: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

impl Rect {
    /// Builds a rectangle.
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }
}

/// Allocates a zeroed buffer, reporting allocation failure as [`Errno::OutOfMemory`].
pub(crate) fn alloc_zeroed(len: usize) -> Result<Vec<u8>, Errno> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Errno::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Linear framebuffer memory.
#[derive(Debug)]
pub struct Screen {
    xres: usize,
    yres: usize,
    visual: Visual,
    scanline: usize,
    pixels: Vec<u8>,
    blits: u64,
}

impl Screen {
    /// Allocates a black screen.
    pub fn new(xres: usize, yres: usize, visual: Visual) -> Result<Self, Errno> {
        let scanline = xres * visual.pixel_bytes();
        let pixels = alloc_zeroed(scanline * yres)?;
        Ok(Self { xres, yres, visual, scanline, pixels, blits: 0 })
    }

    /// Horizontal resolution.
    pub fn xres(&self) -> usize {
        self.xres
    }

    /// Vertical resolution.
    pub fn yres(&self) -> usize {
        self.yres
    }

    /// Pixel encoding.
    pub fn visual(&self) -> Visual {
        self.visual
    }

    /// Bytes per pixel.
    pub fn pixel_bytes(&self) -> usize {
        self.visual.pixel_bytes()
    }

    /// Bytes per scanline.
    pub fn scanline(&self) -> usize {
        self.scanline
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        y * self.scanline + x * self.pixel_bytes()
    }

    /// Raw pixel at `(x, y)`, if on screen.
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        if x >= self.xres || y >= self.yres {
            return None;
        }
        let at = self.offset(x, y);
        self.pixels.get(at..at + self.pixel_bytes())
    }

    /// Writes `0xRRGGBB` at `(x, y)`; off-screen writes are dropped.
    pub fn put_pixel(&mut self, x: usize, y: usize, rgb: u32) {
        if x >= self.xres || y >= self.yres {
            return;
        }
        let at = self.offset(x, y);
        let bytes = self.pixel_bytes();
        self.visual.encode(rgb, &mut self.pixels[at..at + bytes]);
    }

    /// Copies encoded pixels to `(x, y)`, clipped at the right and bottom edges.
    pub fn write_span(&mut self, x: usize, y: usize, src: &[u8]) {
        if x >= self.xres || y >= self.yres {
            return;
        }
        let room = (self.xres - x) * self.pixel_bytes();
        let len = src.len().min(room);
        let at = self.offset(x, y);
        self.pixels[at..at + len].copy_from_slice(&src[..len]);
    }

    /// Encoded pixels starting at `(x, y)`, clipped at the right edge.
    pub fn read_span(&self, x: usize, y: usize, pixels: usize) -> &[u8] {
        if x >= self.xres || y >= self.yres {
            return &[];
        }
        let at = self.offset(x, y);
        let len = pixels.min(self.xres - x) * self.pixel_bytes();
        &self.pixels[at..at + len]
    }

    /// Clips `rect` to the screen.
    pub fn clip(&self, rect: Rect) -> Rect {
        let x = rect.x.min(self.xres);
        let y = rect.y.min(self.yres);
        Rect::new(x, y, rect.width.min(self.xres - x), rect.height.min(self.yres - y))
    }

    pub(crate) fn count_blit(&mut self) {
        self.blits += 1;
    }

    /// Number of character cells painted since start.
    pub fn blits(&self) -> u64 {
        self.blits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_conversions() {
        assert_eq!(Visual::Rgb0888.pixel(0x123456), vec![0x56, 0x34, 0x12, 0x00]);
        assert_eq!(Visual::Bgr0888.pixel(0x123456), vec![0x12, 0x34, 0x56, 0x00]);
        assert_eq!(Visual::Rgb8880.pixel(0x123456), vec![0x00, 0x56, 0x34, 0x12]);
        assert_eq!(Visual::Rgb888.pixel(0x123456), vec![0x56, 0x34, 0x12]);
        assert_eq!(Visual::Rgb565.pixel(0xffffff), vec![0xff, 0xff]);
        assert_eq!(Visual::Rgb565.pixel(0xff0000), 0xf800u16.to_le_bytes().to_vec());
        assert_eq!(Visual::Rgb555.pixel(0x00ff00), 0x03e0u16.to_le_bytes().to_vec());
        assert_eq!(Visual::Indirect8.pixel(0x000000), vec![0xff]);
        assert_eq!(Visual::Indirect8.pixel(0xffffff), vec![0x00]);
    }

    #[test]
    fn spans_clip_at_screen_edge() {
        let mut screen = Screen::new(4, 2, Visual::Rgb565).unwrap();
        screen.write_span(3, 1, &[1, 2, 3, 4]);
        assert_eq!(screen.pixel(3, 1), Some(&[1u8, 2][..]));
        assert_eq!(screen.read_span(2, 1, 8).len(), 4);
        assert_eq!(screen.read_span(4, 0, 1), &[] as &[u8]);
        assert_eq!(screen.clip(Rect::new(2, 1, 10, 10)), Rect::new(2, 1, 2, 1));
        assert!(screen.pixel(4, 0).is_none());
    }
}
