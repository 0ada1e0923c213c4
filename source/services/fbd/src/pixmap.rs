// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Off-screen images in the screen's pixel encoding.

use nexus_abi::Errno;

use crate::screen::{alloc_zeroed, Rect, Screen};

/// A `width` x `height` image stored row by row with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    width: usize,
    height: usize,
    pixel_bytes: usize,
    data: Vec<u8>,
}

impl Pixmap {
    /// Allocates a zeroed image.
    pub fn new(width: usize, height: usize, pixel_bytes: usize) -> Result<Self, Errno> {
        let len = width.checked_mul(height).and_then(|n| n.checked_mul(pixel_bytes)).ok_or(Errno::OutOfMemory)?;
        Ok(Self { width, height, pixel_bytes, data: alloc_zeroed(len)? })
    }

    /// Snapshots `rect` of the screen. Parts outside the screen stay zero.
    pub fn capture(screen: &Screen, rect: Rect) -> Result<Self, Errno> {
        let mut pixmap = Self::new(rect.width, rect.height, screen.pixel_bytes())?;
        pixmap.copy_from(screen, rect.x, rect.y);
        Ok(pixmap)
    }

    /// Refreshes the image from the screen area whose top-left corner is `(x, y)`.
    pub fn copy_from(&mut self, screen: &Screen, x: usize, y: usize) {
        let visible = screen.clip(Rect::new(x, y, self.width, self.height));
        let row_bytes = self.width * self.pixel_bytes;
        for row in 0..visible.height {
            let span = screen.read_span(x, y + row, visible.width);
            let at = row * row_bytes;
            self.data[at..at + span.len()].copy_from_slice(span);
        }
    }

    /// Paints the image into `rect`, clipped to the screen and to the smaller of the two extents.
    pub fn paint(&self, screen: &mut Screen, rect: Rect) {
        let area = screen.clip(rect);
        let width = area.width.min(self.width);
        let height = area.height.min(self.height);
        let row_bytes = self.width * self.pixel_bytes;
        for row in 0..height {
            let at = row * row_bytes;
            screen.write_span(area.x, area.y + row, &self.data[at..at + width * self.pixel_bytes]);
        }
    }

    /// Image width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Raw pixel at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y * self.width + x) * self.pixel_bytes;
        self.data.get(at..at + self.pixel_bytes)
    }

    /// Mutable raw pixel at `(x, y)`.
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> Option<&mut [u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y * self.width + x) * self.pixel_bytes;
        self.data.get_mut(at..at + self.pixel_bytes)
    }
}
