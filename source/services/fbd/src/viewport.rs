// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rectangular text windows on the screen.
//!
//! A viewport keeps a back-buffer of glyph indices, one per character cell, and a cache of
//! every glyph pre-rendered in the screen's pixel encoding. Cells are only repainted when
//! the back-buffer changes.

use nexus_abi::Errno;

use crate::font::{Font, FONT_GLYPHS, FONT_SCANLINES, FONT_WIDTH};
use crate::screen::{alloc_zeroed, Rect, Screen};

/// Foreground and background colour, `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    /// Glyph colour.
    pub fg: u32,
    /// Cell and margin colour.
    pub bg: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cursor {
    active: bool,
    shown: bool,
    col: usize,
    row: usize,
}

/// A text window.
#[derive(Debug)]
pub struct Viewport {
    rect: Rect,
    cols: usize,
    rows: usize,
    style: Style,
    pixel_bytes: usize,
    glyphs: Vec<u8>,
    bg_pixel: Vec<u8>,
    cursor: Cursor,
    backbuf: Vec<u8>,
}

impl Viewport {
    /// Creates a blank viewport covering `rect` and renders its glyph cache.
    ///
    /// Zero extents are `InvalidArgument`; a rectangle reaching past the screen is
    /// `ResourceLimit`.
    pub fn new(screen: &Screen, font: &dyn Font, rect: Rect, style: Style) -> Result<Self, Errno> {
        if rect.width == 0 || rect.height == 0 {
            return Err(Errno::InvalidArgument);
        }
        if rect.x + rect.width > screen.xres() || rect.y + rect.height > screen.yres() {
            log::warn!("fbd: oversized viewport {}x{} at ({}, {})", rect.width, rect.height, rect.x, rect.y);
            return Err(Errno::ResourceLimit);
        }
        let cols = rect.width / FONT_WIDTH;
        let rows = rect.height / FONT_SCANLINES;
        let pixel_bytes = screen.pixel_bytes();
        let glyph_bytes = FONT_WIDTH * FONT_SCANLINES * pixel_bytes;
        let mut viewport = Self {
            rect,
            cols,
            rows,
            style,
            pixel_bytes,
            backbuf: alloc_zeroed(cols * rows)?,
            glyphs: alloc_zeroed(2 * FONT_GLYPHS * glyph_bytes)?,
            bg_pixel: alloc_zeroed(pixel_bytes)?,
            cursor: Cursor::default(),
        };
        viewport.render_glyphs(screen, font);
        Ok(viewport)
    }

    /// Screen area covered.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Text columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Text rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Current style.
    pub fn style(&self) -> Style {
        self.style
    }

    /// Glyph index stored for a cell.
    pub fn cell(&self, col: usize, row: usize) -> Option<u8> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        Some(self.backbuf[row * self.cols + col])
    }

    /// Cursor position as `(col, row)`.
    pub fn cursor_position(&self) -> (usize, usize) {
        (self.cursor.col, self.cursor.row)
    }

    /// Returns `true` when the cursor is enabled.
    pub fn cursor_active(&self) -> bool {
        self.cursor.active
    }

    /// Returns `true` when the cursor is currently drawn.
    pub fn cursor_shown(&self) -> bool {
        self.cursor.shown
    }

    fn glyph_scanline(&self) -> usize {
        FONT_WIDTH * self.pixel_bytes
    }

    fn glyph_offset(&self, glyph: u8, y: usize, cursor: bool) -> usize {
        let glyph_bytes = self.glyph_scanline() * FONT_SCANLINES;
        (glyph as usize + usize::from(cursor) * FONT_GLYPHS) * glyph_bytes + y * self.glyph_scanline()
    }

    fn render_glyphs(&mut self, screen: &Screen, font: &dyn Font) {
        let visual = screen.visual();
        let pb = self.pixel_bytes;
        for glyph in 0..FONT_GLYPHS {
            let glyph = glyph as u8;
            for y in 0..FONT_SCANLINES {
                let bits = font.scanline(glyph, y);
                for x in 0..FONT_WIDTH {
                    let lit = bits & (0x80 >> x) != 0;
                    let plain = if lit { self.style.fg } else { self.style.bg };
                    // The cursor sits on the bottom two scanlines.
                    let cursor = if y >= FONT_SCANLINES - 2 { self.style.fg } else { plain };
                    let at = self.glyph_offset(glyph, y, false) + x * pb;
                    visual.encode(plain, &mut self.glyphs[at..at + pb]);
                    let at = self.glyph_offset(glyph, y, true) + x * pb;
                    visual.encode(cursor, &mut self.glyphs[at..at + pb]);
                }
            }
        }
        visual.encode(self.style.bg, &mut self.bg_pixel);
    }

    /// Changes the colours and re-renders the glyph cache. The screen is not repainted.
    pub fn set_style(&mut self, screen: &Screen, font: &dyn Font, style: Style) {
        self.style = style;
        self.render_glyphs(screen, font);
    }

    fn paint(&self, screen: &mut Screen, glyph: u8, cursor: bool, col: usize, row: usize) {
        let x = self.rect.x + col * FONT_WIDTH;
        let y = self.rect.y + row * FONT_SCANLINES;
        let len = self.glyph_scanline();
        for yd in 0..FONT_SCANLINES {
            let at = self.glyph_offset(glyph, yd, cursor);
            screen.write_span(x, y + yd, &self.glyphs[at..at + len]);
        }
        screen.count_blit();
    }

    fn draw_glyph(&self, screen: &mut Screen, cursor: bool, col: usize, row: usize) {
        if let Some(glyph) = self.cell(col, row) {
            self.paint(screen, glyph, cursor, col, row);
        }
    }

    /// Repaints every cell and the background margins right of and below the grid.
    pub fn redraw(&self, screen: &mut Screen) {
        for row in 0..self.rows {
            for col in 0..self.cols {
                self.draw_glyph(screen, false, col, row);
            }
        }
        let grid_w = self.cols * FONT_WIDTH;
        let grid_h = self.rows * FONT_SCANLINES;
        for y in 0..self.rect.height {
            let from = if y < grid_h { grid_w } else { 0 };
            for x in from..self.rect.width {
                screen.write_span(self.rect.x + x, self.rect.y + y, &self.bg_pixel);
            }
        }
    }

    /// Empties the grid, repaints and re-shows the cursor.
    pub fn clear(&mut self, screen: &mut Screen) {
        self.backbuf.fill(0);
        self.redraw(screen);
        self.cursor_show(screen);
    }

    /// Scrolls the text by `lines` rows: positive moves content up, negative down.
    ///
    /// Rows that scroll in are blank. Only cells whose glyph changes are repainted.
    pub fn scroll(&mut self, screen: &mut Screen, lines: isize) -> Result<(), Errno> {
        let shift = lines.unsigned_abs();
        if shift > self.rows {
            return Err(Errno::InvalidArgument);
        }
        self.cursor_hide(screen);
        let mut next = vec![0u8; self.backbuf.len()];
        let keep = (self.rows - shift) * self.cols;
        let moved = shift * self.cols;
        if lines >= 0 {
            next[..keep].copy_from_slice(&self.backbuf[moved..]);
        } else {
            next[moved..].copy_from_slice(&self.backbuf[..keep]);
        }
        for row in 0..self.rows {
            for col in 0..self.cols {
                let at = row * self.cols + col;
                if self.backbuf[at] != next[at] {
                    self.paint(screen, next[at], false, col, row);
                }
            }
        }
        self.backbuf = next;
        self.cursor_show(screen);
        Ok(())
    }

    /// Repaints the cursor cell without the cursor, if it is drawn.
    pub fn cursor_hide(&mut self, screen: &mut Screen) {
        if self.cursor.active && self.cursor.shown {
            self.draw_glyph(screen, false, self.cursor.col, self.cursor.row);
            self.cursor.shown = false;
        }
    }

    /// Draws the cursor if it is enabled, whether or not it is already shown.
    pub fn cursor_show(&mut self, screen: &mut Screen) {
        if self.cursor.active {
            self.draw_glyph(screen, true, self.cursor.col, self.cursor.row);
            self.cursor.shown = true;
        }
    }

    /// Toggles the cursor.
    pub fn cursor_blink(&mut self, screen: &mut Screen) {
        if self.cursor.shown {
            self.cursor_hide(screen);
        } else {
            self.cursor_show(screen);
        }
    }

    /// Moves the cursor.
    pub fn cursor_goto(&mut self, screen: &mut Screen, col: usize, row: usize) -> Result<(), Errno> {
        if col >= self.cols || row >= self.rows {
            return Err(Errno::InvalidArgument);
        }
        self.cursor_hide(screen);
        self.cursor.col = col;
        self.cursor.row = row;
        self.cursor_show(screen);
        Ok(())
    }

    /// Enables or disables the cursor.
    pub fn set_cursor_visibility(&mut self, screen: &mut Screen, active: bool) {
        self.cursor_hide(screen);
        self.cursor.active = active;
        self.cursor_show(screen);
    }

    /// Writes a character and advances the cursor past it.
    pub fn put_char(&mut self, screen: &mut Screen, glyph: u8, col: usize, row: usize) -> Result<(), Errno> {
        if col >= self.cols || row >= self.rows {
            return Err(Errno::InvalidArgument);
        }
        if self.cursor.active && self.cursor.shown && (self.cursor.col, self.cursor.row) == (col, row) {
            // The cursor cell is overwritten, so it is repainted even if the glyph is unchanged.
            self.backbuf[row * self.cols + col] = glyph;
            self.draw_glyph(screen, false, col, row);
            self.cursor.shown = false;
        } else {
            self.cursor_hide(screen);
            self.store(screen, glyph, col, row);
        }
        self.cursor.col = col + 1;
        self.cursor.row = row;
        if self.cursor.col >= self.cols {
            self.cursor.col = 0;
            self.cursor.row = (row + 1).min(self.rows - 1);
        }
        self.cursor_show(screen);
        Ok(())
    }

    fn store(&mut self, screen: &mut Screen, glyph: u8, col: usize, row: usize) {
        let at = row * self.cols + col;
        if self.backbuf[at] != glyph {
            self.backbuf[at] = glyph;
            self.draw_glyph(screen, false, col, row);
        }
    }

    /// Replaces the whole grid, row-major, then re-shows the cursor.
    ///
    /// `glyphs` must yield at least `cols * rows` items; surplus items are ignored.
    pub fn draw_text(&mut self, screen: &mut Screen, glyphs: impl IntoIterator<Item = u8>) {
        let cols = self.cols.max(1);
        for (i, glyph) in glyphs.into_iter().take(self.cols * self.rows).enumerate() {
            self.store(screen, glyph, i % cols, i / cols);
        }
        self.cursor_show(screen);
    }
}
