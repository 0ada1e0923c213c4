// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mouse pointer drawn over the screen contents.

use crate::pixmap::Pixmap;
use crate::screen::{Rect, Screen};

/// Pointer bitmap width.
pub const POINTER_WIDTH: usize = 8;
/// Pointer bitmap height.
pub const POINTER_HEIGHT: usize = 14;

// One byte per row, bit 0 is the leftmost pixel. Set bits are black.
const POINTER_BITS: [u8; POINTER_HEIGHT] =
    [0x01, 0x03, 0x05, 0x09, 0x11, 0x21, 0x41, 0x81, 0x71, 0x15, 0x13, 0x20, 0x40, 0x60];
// Set bits are drawn; the rest shows the screen beneath.
const POINTER_MASK: [u8; POINTER_HEIGHT] =
    [0x01, 0x03, 0x07, 0x0f, 0x1f, 0x3f, 0x7f, 0xff, 0x7f, 0x1f, 0x13, 0x30, 0x60, 0x60];

const BLACK: u32 = 0x000000;
const WHITE: u32 = 0xffffff;

/// Pointer position and the pixels saved beneath it.
#[derive(Debug, Default)]
pub struct PointerOverlay {
    x: usize,
    y: usize,
    enabled: bool,
    shown: bool,
    saved: Option<Pixmap>,
}

impl PointerOverlay {
    /// Creates a disabled pointer at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the hot spot.
    pub fn position(&self) -> (usize, usize) {
        (self.x, self.y)
    }

    /// Returns `true` once the pointer has been moved at least once.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` while the pointer is drawn.
    pub fn shown(&self) -> bool {
        self.shown
    }

    fn area(&self) -> Rect {
        Rect::new(self.x, self.y, POINTER_WIDTH, POINTER_HEIGHT)
    }

    /// Moves the pointer, enabling it on first use.
    pub fn move_to(&mut self, screen: &mut Screen, x: usize, y: usize) {
        self.enabled = true;
        self.hide(screen);
        self.x = x;
        self.y = y;
        self.show(screen);
    }

    /// Saves the pixels beneath the pointer and draws it.
    pub fn show(&mut self, screen: &mut Screen) {
        if self.shown || !self.enabled {
            return;
        }
        match &mut self.saved {
            Some(saved) => saved.copy_from(screen, self.x, self.y),
            None => match Pixmap::capture(screen, self.area()) {
                Ok(saved) => self.saved = Some(saved),
                Err(err) => {
                    log::warn!("fbd: pointer save buffer unavailable: {err}");
                    return;
                }
            },
        }
        for (row, (bits, mask)) in POINTER_BITS.iter().zip(POINTER_MASK.iter()).enumerate() {
            for col in 0..POINTER_WIDTH {
                if mask & (1 << col) == 0 {
                    continue;
                }
                // Positions near the top of the address range are simply off-screen.
                let (Some(x), Some(y)) = (self.x.checked_add(col), self.y.checked_add(row)) else {
                    continue;
                };
                let color = if bits & (1 << col) != 0 { BLACK } else { WHITE };
                screen.put_pixel(x, y, color);
            }
        }
        self.shown = true;
    }

    /// Restores the pixels beneath the pointer.
    pub fn hide(&mut self, screen: &mut Screen) {
        if !self.shown {
            return;
        }
        if let Some(saved) = &self.saved {
            saved.paint(screen, self.area());
        }
        self.shown = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::Visual;

    #[test]
    fn show_and_hide_restore_the_screen() {
        let mut screen = Screen::new(32, 32, Visual::Rgb0888).unwrap();
        screen.put_pixel(4, 4, 0x123456);
        let mut pointer = PointerOverlay::new();
        pointer.show(&mut screen);
        assert!(!pointer.shown());

        pointer.move_to(&mut screen, 2, 2);
        assert!(pointer.enabled() && pointer.shown());
        // Hot spot is an outline pixel; (2 + 0, 2 + 2) is filled white.
        assert_eq!(screen.pixel(2, 2), Some(&[0, 0, 0, 0][..]));
        assert_eq!(screen.pixel(3, 4), Some(&[0xff, 0xff, 0xff, 0][..]));

        pointer.move_to(&mut screen, 20, 20);
        assert_eq!(screen.pixel(4, 4), Some(&[0x56, 0x34, 0x12, 0][..]));
        pointer.hide(&mut screen);
        assert_eq!(screen.pixel(20, 20), Some(&[0, 0, 0, 0][..]));
    }

    #[test]
    fn pointer_near_the_edge_is_clipped() {
        let mut screen = Screen::new(10, 10, Visual::Rgb565).unwrap();
        screen.put_pixel(9, 9, 0xffffff);
        let mut pointer = PointerOverlay::new();
        pointer.move_to(&mut screen, 9, 9);
        assert_eq!(screen.pixel(9, 9), Some(&[0, 0][..]));
        pointer.hide(&mut screen);
        assert_eq!(screen.pixel(9, 9), Some(&[0xff, 0xff][..]));
    }

    #[test]
    fn position_at_end_of_range_draws_nothing() {
        let mut screen = Screen::new(10, 10, Visual::Rgb0888).unwrap();
        let before = screen.read_span(0, 0, 10).to_vec();
        let mut pointer = PointerOverlay::new();
        pointer.move_to(&mut screen, usize::MAX - 2, usize::MAX);
        assert!(pointer.shown());
        pointer.move_to(&mut screen, 0, 0);
        pointer.hide(&mut screen);
        assert_eq!(screen.read_span(0, 0, 10), &before[..]);
    }
}
