// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed client for the framebuffer call surface.

use nexus_abi::fb::*;
use nexus_abi::{Method, Sysarg};
use nexus_ipc::{Answer, Result, Session, SharedArea};

/// Framebuffer client over an established session.
pub struct FbClient {
    session: Session,
}

impl FbClient {
    /// Wraps a session to the framebuffer service.
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn request(&self, method: Method, args: &[Sysarg]) -> Result<[Sysarg; nexus_abi::CALL_ARGS]> {
        self.session.exchange()?.request(method, args)
    }

    fn command(&self, method: Method, args: &[Sysarg]) -> Result<()> {
        self.request(method, args).map(|_| ())
    }

    /// Writes `glyph` at `(row, col)` of the current viewport.
    pub fn put_char(&self, glyph: u8, row: usize, col: usize) -> Result<()> {
        self.command(FB_PUTCHAR, &[glyph.into(), row, col])
    }

    /// Clears the current viewport.
    pub fn clear(&self) -> Result<()> {
        self.command(FB_CLEAR, &[])
    }

    /// Moves the cursor.
    pub fn cursor_goto(&self, row: usize, col: usize) -> Result<()> {
        self.command(FB_CURSOR_GOTO, &[row, col])
    }

    /// Enables or disables the cursor.
    pub fn cursor_visibility(&self, visible: bool) -> Result<()> {
        self.command(FB_CURSOR_VISIBILITY, &[visible.into()])
    }

    /// Text grid of the current viewport as `(rows, cols)`.
    pub fn grid_size(&self) -> Result<(usize, usize)> {
        let words = self.request(FB_GET_CSIZE, &[])?;
        Ok((words[0], words[1]))
    }

    /// Scrolls the current viewport; negative values scroll down.
    pub fn scroll(&self, lines: isize) -> Result<()> {
        self.command(FB_SCROLL, &[lines as Sysarg])
    }

    /// Makes `viewport` current.
    pub fn viewport_switch(&self, viewport: Sysarg) -> Result<()> {
        self.command(FB_VIEWPORT_SWITCH, &[viewport])
    }

    /// Creates a viewport and returns its id.
    pub fn viewport_create(&self, x: u16, y: u16, width: u16, height: u16) -> Result<Sysarg> {
        Ok(self.request(FB_VIEWPORT_CREATE, &[pack_pair(x, y), pack_pair(width, height)])?[0])
    }

    /// Deletes a viewport.
    pub fn viewport_delete(&self, viewport: Sysarg) -> Result<()> {
        self.command(FB_VIEWPORT_DELETE, &[viewport])
    }

    /// Sets the colours of the current viewport.
    pub fn set_style(&self, fg: u32, bg: u32) -> Result<()> {
        self.command(FB_SET_STYLE, &[fg as Sysarg, bg as Sysarg])
    }

    /// Screen resolution as `(xres, yres)`.
    pub fn resolution(&self) -> Result<(usize, usize)> {
        let words = self.request(FB_GET_RESOLUTION, &[])?;
        Ok((words[0], words[1]))
    }

    /// Moves the mouse pointer.
    pub fn pointer_move(&self, x: usize, y: usize) -> Result<()> {
        self.command(FB_POINTER_MOVE, &[x, y])
    }

    /// Announces the id of the area about to be shared.
    pub fn prepare_shared(&self, id: Sysarg) -> Result<()> {
        self.command(FB_PREPARE_SHM, &[id])
    }

    /// Shares `area` under `id`; id 0 installs the text area.
    pub fn share(&self, id: Sysarg, area: &SharedArea) -> Result<()> {
        let answer: Answer = self.session.exchange()?.share_out(id, area)?;
        answer.into_result().map(|_| ())
    }

    /// Releases the shared bitmap area.
    pub fn drop_shared(&self) -> Result<()> {
        self.command(FB_DROP_SHM, &[])
    }

    /// Decodes the shared bitmap into a new pixmap.
    pub fn shared_to_pixmap(&self) -> Result<Sysarg> {
        Ok(self.request(FB_SHM2PIXMAP, &[])?[0])
    }

    /// Draws the shared bitmap at `(x, y)` of the current viewport.
    pub fn draw_shared(&self, x: usize, y: usize) -> Result<()> {
        self.command(FB_DRAW_PPM, &[x, y])
    }

    /// Applies the shared text area to the current viewport.
    pub fn draw_text_block(&self) -> Result<()> {
        self.command(FB_DRAW_TEXT_DATA, &[])
    }

    /// Paints `pixmap` into `viewport`.
    pub fn draw_pixmap(&self, viewport: Sysarg, pixmap: Sysarg) -> Result<()> {
        self.command(FB_VP_DRAW_PIXMAP, &[viewport, pixmap])
    }

    /// Snapshots `viewport` into a new pixmap.
    pub fn viewport_to_pixmap(&self, viewport: Sysarg) -> Result<Sysarg> {
        Ok(self.request(FB_VP2PIXMAP, &[viewport])?[0])
    }

    /// Frees a pixmap.
    pub fn drop_pixmap(&self, pixmap: Sysarg) -> Result<()> {
        self.command(FB_DROP_PIXMAP, &[pixmap])
    }

    /// Creates an animation targeting `viewport`.
    pub fn animation_create(&self, viewport: Sysarg) -> Result<Sysarg> {
        Ok(self.request(FB_ANIM_CREATE, &[viewport])?[0])
    }

    /// Frees an animation.
    pub fn animation_drop(&self, anim: Sysarg) -> Result<()> {
        self.command(FB_ANIM_DROP, &[anim])
    }

    /// Appends a frame.
    pub fn animation_add_frame(&self, anim: Sysarg, pixmap: Sysarg) -> Result<()> {
        self.command(FB_ANIM_ADDPIXMAP, &[anim, pixmap])
    }

    /// Points an animation at another viewport.
    pub fn animation_retarget(&self, anim: Sysarg, viewport: Sysarg) -> Result<()> {
        self.command(FB_ANIM_CHGVP, &[anim, viewport])
    }

    /// Starts an animation.
    pub fn animation_start(&self, anim: Sysarg) -> Result<()> {
        self.command(FB_ANIM_START, &[anim])
    }

    /// Stops an animation.
    pub fn animation_stop(&self, anim: Sysarg) -> Result<()> {
        self.command(FB_ANIM_STOP, &[anim])
    }
}
