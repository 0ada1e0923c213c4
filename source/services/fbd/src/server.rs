// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The framebuffer service loop.
//!
//! One client at a time is admitted. While it is connected the loop waits for calls with a
//! timeout whenever the cursor of the current viewport or an animation needs periodic
//! redraws, and performs that work whenever the wait times out.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use nexus_abi::fb::*;
use nexus_abi::{Errno, ServiceTag, Sysarg, TaskId};
use nexus_ipc::{answerbox, Answer, Answerbox, CallKind, ChannelId, IncomingCall, IpcError, Port, Session, Wait};
use thiserror::Error;

use crate::animation::Animations;
use crate::config::FbConfig;
use crate::font::{BuiltinFont, Font};
use crate::pixmap::Pixmap;
use crate::pointer::PointerOverlay;
use crate::pool::{Handle, Pool, PoolError};
use crate::ppm;
use crate::screen::{Rect, Screen};
use crate::shm::{SharedMemory, TextCell};
use crate::viewport::{Style, Viewport};

/// Errors that stop the service.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The framebuffer could not be set up.
    #[error("screen setup failed: {0}")]
    Screen(Errno),
    /// The service thread could not be started.
    #[error("failed to start service thread: {0}")]
    Spawn(#[from] io::Error),
    /// Receiving from the service port failed.
    #[error("transport error: {0}")]
    Transport(IpcError),
    /// Registration with the naming service failed.
    #[error("naming service: {0}")]
    Naming(#[from] samgr::Error),
    /// The service thread panicked.
    #[error("service thread panicked")]
    Panicked,
}

type Reply = Result<Answer, Errno>;

fn done() -> Reply {
    Ok(Answer::ok())
}

fn invalid(_: PoolError) -> Errno {
    Errno::InvalidArgument
}

/// Framebuffer state owned by the service thread.
pub struct FbServer {
    config: FbConfig,
    screen: Screen,
    font: Box<dyn Font>,
    viewports: Pool<Viewport>,
    pixmaps: Pool<Pixmap>,
    animations: Animations,
    pointer: PointerOverlay,
    shm: SharedMemory,
    client: Option<ChannelId>,
    root: Handle,
    current: Handle,
}

impl FbServer {
    /// Sets up the screen with the built-in font.
    pub fn new(config: &FbConfig) -> Result<Self, ServerError> {
        Self::with_font(config, Box::new(BuiltinFont))
    }

    /// Sets up the screen and viewport 0 using `font`.
    pub fn with_font(config: &FbConfig, font: Box<dyn Font>) -> Result<Self, ServerError> {
        let width = config.screen.width as usize;
        let height = config.screen.height as usize;
        let mut screen = Screen::new(width, height, config.screen.visual).map_err(ServerError::Screen)?;
        let style = Style { fg: config.style.fg, bg: config.style.bg };
        let root_vp =
            Viewport::new(&screen, font.as_ref(), Rect::new(0, 0, width, height), style).map_err(ServerError::Screen)?;
        root_vp.redraw(&mut screen);
        let mut viewports = Pool::with_capacity(config.limits.viewports);
        let root = viewports.insert(root_vp).map_err(|_| ServerError::Screen(Errno::ResourceLimit))?;
        info!("fbd: {}x{} {:?} framebuffer ready", width, height, config.screen.visual);
        Ok(Self {
            screen,
            font,
            viewports,
            pixmaps: Pool::with_capacity(config.limits.pixmaps),
            animations: Animations::new(config.limits.animations, config.timing.anim_rate_divisor),
            pointer: PointerOverlay::new(),
            shm: SharedMemory::new(),
            client: None,
            root,
            current: root,
            config: config.clone(),
        })
    }

    /// The framebuffer contents.
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// Channel of the admitted client.
    pub fn client(&self) -> Option<ChannelId> {
        self.client
    }

    /// Wire id of the viewport the client draws into.
    pub fn current_viewport(&self) -> Sysarg {
        self.current.to_word()
    }

    /// Looks up a viewport by its wire id.
    pub fn viewport(&self, word: Sysarg) -> Option<&Viewport> {
        self.viewports.resolve(word).and_then(|id| self.viewports.get(id)).ok()
    }

    /// Number of live viewports, viewport 0 included.
    pub fn viewport_count(&self) -> usize {
        self.viewports.len()
    }

    /// Looks up a pixmap by its wire id.
    pub fn pixmap(&self, word: Sysarg) -> Option<&Pixmap> {
        self.pixmaps.resolve(word).and_then(|id| self.pixmaps.get(id)).ok()
    }

    /// Number of live pixmaps.
    pub fn pixmap_count(&self) -> usize {
        self.pixmaps.len()
    }

    /// The animation table.
    pub fn animations(&self) -> &Animations {
        &self.animations
    }

    /// Shared memory negotiated with the client.
    pub fn shared_memory(&self) -> &SharedMemory {
        &self.shm
    }

    /// The pointer overlay.
    pub fn pointer(&self) -> &PointerOverlay {
        &self.pointer
    }

    /// Returns `true` when the loop has to wake up periodically.
    pub fn background_pending(&self) -> bool {
        if self.client.is_none() {
            return false;
        }
        let blinking = self.viewports.get(self.current).is_ok_and(Viewport::cursor_active);
        blinking || self.animations.enabled_count() > 0
    }

    /// Serves calls until the port is shut down.
    pub fn run(&mut self, inbox: &Answerbox) -> Result<(), ServerError> {
        loop {
            let wait = if self.background_pending() { Wait::Timeout(self.config.tick()) } else { Wait::Blocking };
            match inbox.recv(wait) {
                Ok(call) => {
                    self.pointer.hide(&mut self.screen);
                    self.handle(call);
                    self.pointer.show(&mut self.screen);
                }
                Err(IpcError::Timeout) => self.tick(),
                Err(IpcError::Hangup) => {
                    info!("fbd: port closed, stopping");
                    return Ok(());
                }
                Err(err) => {
                    error!("fbd: receive failed: {err}");
                    return Err(ServerError::Transport(err));
                }
            }
        }
    }

    /// Periodic work: cursor blink on the current viewport and animation frames.
    pub fn tick(&mut self) {
        self.pointer.hide(&mut self.screen);
        if let Ok(vp) = self.viewports.get_mut(self.current) {
            vp.cursor_blink(&mut self.screen);
        }
        for (vp, pm) in self.animations.tick() {
            // Frames whose pixmap or viewport went away are skipped.
            let (Ok(vp), Ok(pm)) = (self.viewports.get(vp), self.pixmaps.get(pm)) else {
                continue;
            };
            pm.paint(&mut self.screen, vp.rect());
        }
        self.pointer.show(&mut self.screen);
    }

    /// Handles one delivered call, answering it.
    pub fn handle(&mut self, mut call: IncomingCall) {
        match call.kind() {
            CallKind::ConnectMeTo => self.admit(call),
            CallKind::Hangup => {
                if self.client == Some(call.channel()) {
                    self.disconnect();
                } else {
                    debug!("fbd: ignoring hangup of {}", call.channel());
                }
            }
            _ if self.client != Some(call.channel()) => {
                warn!("fbd: call {} from inactive {}", call.method(), call.channel());
                reply(call, Err(Errno::ResourceLimit));
            }
            _ => {
                let result = self.dispatch(&mut call);
                if let Err(err) = &result {
                    debug!("fbd: method {} failed: {err}", call.method());
                }
                reply(call, result);
            }
        }
    }

    fn admit(&mut self, call: IncomingCall) {
        if let Some(active) = self.client {
            warn!("fbd: refusing connection, {active} is active");
            reply(call, Err(Errno::ResourceLimit));
            return;
        }
        match call.accept() {
            Ok(channel) => {
                info!("fbd: client connected on {channel}");
                self.client = Some(channel);
            }
            Err(err) => warn!("fbd: client vanished during connect: {err}"),
        }
    }

    /// Forgets the client and every resource it created.
    pub fn disconnect(&mut self) {
        if let Some(channel) = self.client.take() {
            info!("fbd: client on {channel} hung up");
        }
        let root = self.root;
        self.viewports.retain(|id, _| id == root);
        self.pixmaps.retain(|_, _| false);
        self.animations.clear();
        self.shm.reset();
        self.current = root;
    }

    fn dispatch(&mut self, call: &mut IncomingCall) -> Reply {
        if let Some(result) = self.handle_shm(call) {
            return result;
        }
        if let Some(result) = self.handle_pixmap(call) {
            return result;
        }
        if let Some(result) = self.handle_anim(call) {
            return result;
        }
        self.handle_viewport(call)
    }

    /// Resolves a viewport argument where `CURRENT_VIEWPORT` names the current one.
    fn target_viewport(&self, word: Sysarg) -> Result<Handle, Errno> {
        if word == CURRENT_VIEWPORT {
            return Ok(self.current);
        }
        self.viewports.resolve(word).map_err(invalid)
    }

    fn switchable_viewport(&self, word: Sysarg) -> Result<Handle, Errno> {
        self.viewports.resolve(word).map_err(|err| match err {
            PoolError::OutOfRange => Errno::NotFound,
            PoolError::Vacant | PoolError::Stale | PoolError::Full => Errno::AddressUnavailable,
        })
    }

    fn handle_shm(&mut self, call: &mut IncomingCall) -> Option<Reply> {
        let result = match call.kind() {
            CallKind::ShareOut => {
                let area = call.take_area();
                self.shm.offer(call.arg(1), area).map(|()| Answer::ok())
            }
            CallKind::Application(FB_PREPARE_SHM) => self.shm.prepare(call.arg(1)).map(|()| Answer::ok()),
            CallKind::Application(FB_DROP_SHM) => {
                self.shm.drop_shared();
                done()
            }
            CallKind::Application(FB_SHM2PIXMAP) => self.shm_to_pixmap(),
            CallKind::Application(FB_DRAW_PPM) => self.draw_shared(call.arg(1), call.arg(2)),
            CallKind::Application(FB_DRAW_TEXT_DATA) => self.draw_text_block(),
            _ => return None,
        };
        Some(result)
    }

    fn shm_to_pixmap(&mut self) -> Reply {
        let area = self.shm.mapped()?;
        self.pixmaps.ensure_vacancy().map_err(|_| Errno::ResourceLimit)?;
        let bytes = area.read();
        let header = ppm::parse_header(&bytes).map_err(|err| {
            warn!("fbd: rejecting shared bitmap: {err}");
            Errno::InvalidData
        })?;
        let visual = self.screen.visual();
        let mut pixmap = Pixmap::new(header.width, header.height, visual.pixel_bytes())?;
        ppm::draw(&bytes, &header, header.width, header.height, |x, y, rgb| {
            if let Some(dst) = pixmap.pixel_mut(x, y) {
                visual.encode(rgb, dst);
            }
        });
        drop(bytes);
        let id = self.pixmaps.insert(pixmap).map_err(|_| Errno::ResourceLimit)?;
        debug!("fbd: decoded {}x{} pixmap {id}", header.width, header.height);
        Ok(Answer::ok_with(&[id.to_word()]))
    }

    fn draw_shared(&mut self, x: Sysarg, y: Sysarg) -> Reply {
        let area = self.shm.mapped()?;
        let rect = self.viewports.get(self.current).map_err(|_| Errno::AddressUnavailable)?.rect();
        if x >= rect.width || y >= rect.height {
            return Err(Errno::InvalidArgument);
        }
        let bytes = area.read();
        let header = ppm::parse_header(&bytes).map_err(|_| Errno::InvalidData)?;
        let screen = &mut self.screen;
        ppm::draw(&bytes, &header, rect.width - x, rect.height - y, |px, py, rgb| {
            screen.put_pixel(rect.x + x + px, rect.y + y + py, rgb);
        });
        done()
    }

    fn draw_text_block(&mut self) -> Reply {
        let vp = self.viewports.get_mut(self.current).map_err(|_| Errno::AddressUnavailable)?;
        let cells = self.shm.text_cells(vp.cols() * vp.rows())?;
        vp.draw_text(&mut self.screen, cells.iter().map(TextCell::glyph));
        done()
    }

    fn handle_pixmap(&mut self, call: &IncomingCall) -> Option<Reply> {
        let result = match call.kind() {
            CallKind::Application(FB_VP_DRAW_PIXMAP) => self.draw_pixmap(call.arg(1), call.arg(2)),
            CallKind::Application(FB_VP2PIXMAP) => self.viewport_to_pixmap(call.arg(1)),
            CallKind::Application(FB_DROP_PIXMAP) => self.drop_pixmap(call.arg(1)),
            _ => return None,
        };
        Some(result)
    }

    fn draw_pixmap(&mut self, vp: Sysarg, pm: Sysarg) -> Reply {
        let vp = self.target_viewport(vp)?;
        let pm = self.pixmaps.resolve(pm).map_err(invalid)?;
        let rect = self.viewports.get(vp).map_err(invalid)?.rect();
        self.pixmaps.get(pm).map_err(invalid)?.paint(&mut self.screen, rect);
        done()
    }

    fn viewport_to_pixmap(&mut self, vp: Sysarg) -> Reply {
        let vp = self.target_viewport(vp)?;
        self.pixmaps.ensure_vacancy().map_err(|_| Errno::ResourceLimit)?;
        let rect = self.viewports.get(vp).map_err(invalid)?.rect();
        let pixmap = Pixmap::capture(&self.screen, rect)?;
        let id = self.pixmaps.insert(pixmap).map_err(|_| Errno::ResourceLimit)?;
        Ok(Answer::ok_with(&[id.to_word()]))
    }

    fn drop_pixmap(&mut self, pm: Sysarg) -> Reply {
        match self.pixmaps.resolve(pm) {
            Ok(id) => {
                self.pixmaps.remove(id).map_err(invalid)?;
                done()
            }
            // Dropping a free slot is harmless.
            Err(PoolError::Vacant) => done(),
            Err(_) => Err(Errno::InvalidArgument),
        }
    }

    fn handle_anim(&mut self, call: &IncomingCall) -> Option<Reply> {
        let result = match call.kind() {
            CallKind::Application(FB_ANIM_CREATE) => self
                .target_viewport(call.arg(1))
                .and_then(|vp| self.animations.create(vp))
                .map(|id| Answer::ok_with(&[id.to_word()])),
            CallKind::Application(FB_ANIM_DROP) => {
                self.animations.resolve(call.arg(1)).and_then(|id| self.animations.remove(id)).map(|()| Answer::ok())
            }
            CallKind::Application(FB_ANIM_ADDPIXMAP) => self.add_frame(call.arg(1), call.arg(2)),
            CallKind::Application(FB_ANIM_CHGVP) => self.retarget(call.arg(1), call.arg(2)),
            CallKind::Application(FB_ANIM_START) => {
                self.animations.resolve(call.arg(1)).and_then(|id| self.animations.start(id)).map(|()| Answer::ok())
            }
            CallKind::Application(FB_ANIM_STOP) => {
                self.animations.resolve(call.arg(1)).and_then(|id| self.animations.stop(id)).map(|()| Answer::ok())
            }
            _ => return None,
        };
        Some(result)
    }

    fn add_frame(&mut self, anim: Sysarg, pm: Sysarg) -> Reply {
        let anim = self.animations.resolve(anim)?;
        let pm = self.pixmaps.resolve(pm).map_err(invalid)?;
        self.animations.add_frame(anim, pm)?;
        done()
    }

    fn retarget(&mut self, anim: Sysarg, vp: Sysarg) -> Reply {
        let anim = self.animations.resolve(anim)?;
        let vp = self.target_viewport(vp)?;
        self.animations.retarget(anim, vp)?;
        done()
    }

    fn handle_viewport(&mut self, call: &IncomingCall) -> Reply {
        let CallKind::Application(method) = call.kind() else {
            return Err(Errno::NotFound);
        };
        match method {
            FB_PUTCHAR => {
                let glyph = call.arg(1) as u8;
                let (row, col) = (call.arg(2), call.arg(3));
                let vp = self.viewports.get_mut(self.current).map_err(|_| Errno::AddressUnavailable)?;
                vp.put_char(&mut self.screen, glyph, col, row)?;
                done()
            }
            FB_CLEAR => {
                let vp = self.viewports.get_mut(self.current).map_err(|_| Errno::AddressUnavailable)?;
                vp.clear(&mut self.screen);
                done()
            }
            FB_CURSOR_GOTO => {
                let (row, col) = (call.arg(1), call.arg(2));
                let vp = self.viewports.get_mut(self.current).map_err(|_| Errno::AddressUnavailable)?;
                vp.cursor_goto(&mut self.screen, col, row)?;
                done()
            }
            FB_CURSOR_VISIBILITY => {
                let vp = self.viewports.get_mut(self.current).map_err(|_| Errno::AddressUnavailable)?;
                vp.set_cursor_visibility(&mut self.screen, call.arg(1) != 0);
                done()
            }
            FB_GET_CSIZE => {
                let vp = self.viewports.get(self.current).map_err(|_| Errno::AddressUnavailable)?;
                Ok(Answer::ok_with(&[vp.rows(), vp.cols()]))
            }
            FB_SCROLL => {
                let lines = call.arg(1) as isize;
                let vp = self.viewports.get_mut(self.current).map_err(|_| Errno::AddressUnavailable)?;
                vp.scroll(&mut self.screen, lines)?;
                done()
            }
            FB_VIEWPORT_SWITCH => {
                let next = self.switchable_viewport(call.arg(1))?;
                if let Ok(vp) = self.viewports.get_mut(self.current) {
                    vp.cursor_hide(&mut self.screen);
                }
                self.current = next;
                let vp = self.viewports.get_mut(next).map_err(|_| Errno::AddressUnavailable)?;
                vp.cursor_show(&mut self.screen);
                done()
            }
            FB_VIEWPORT_CREATE => self.create_viewport(call.arg(1), call.arg(2)),
            FB_VIEWPORT_DELETE => {
                let id = self.switchable_viewport(call.arg(1))?;
                if id == self.root || id == self.current {
                    return Err(Errno::Busy);
                }
                self.viewports.remove(id).map_err(|_| Errno::AddressUnavailable)?;
                debug!("fbd: viewport {id} deleted");
                done()
            }
            FB_SET_STYLE => {
                let style = Style { fg: call.arg(1) as u32, bg: call.arg(2) as u32 };
                let vp = self.viewports.get_mut(self.current).map_err(|_| Errno::AddressUnavailable)?;
                vp.set_style(&self.screen, self.font.as_ref(), style);
                done()
            }
            FB_GET_RESOLUTION => Ok(Answer::ok_with(&[self.screen.xres(), self.screen.yres()])),
            FB_POINTER_MOVE => {
                self.pointer.move_to(&mut self.screen, call.arg(1), call.arg(2));
                done()
            }
            other => {
                debug!("fbd: unknown method {other}");
                Err(Errno::NotFound)
            }
        }
    }

    fn create_viewport(&mut self, origin: Sysarg, extent: Sysarg) -> Reply {
        let (x, y) = unpack_pair(origin);
        let (width, height) = unpack_pair(extent);
        self.viewports.ensure_vacancy().map_err(|_| Errno::ResourceLimit)?;
        let rect = Rect::new(x.into(), y.into(), width.into(), height.into());
        let style = Style { fg: self.config.style.fg, bg: self.config.style.bg };
        let vp = Viewport::new(&self.screen, self.font.as_ref(), rect, style)?;
        let id = self.viewports.insert(vp).map_err(|_| Errno::ResourceLimit)?;
        debug!("fbd: viewport {id} at ({x}, {y}) {width}x{height}");
        Ok(Answer::ok_with(&[id.to_word()]))
    }

    /// Starts the service loop on its own thread.
    pub fn spawn(self) -> Result<FbHandle, ServerError> {
        let (port, inbox) = answerbox();
        let mut server = self;
        let thread = thread::Builder::new().name("fbd".into()).spawn(move || server.run(&inbox))?;
        Ok(FbHandle { port, thread: Some(thread) })
    }
}

fn reply(call: IncomingCall, result: Reply) {
    let answer = result.unwrap_or_else(Answer::error);
    if let Err(err) = call.answer(answer) {
        debug!("fbd: caller went away before the answer: {err}");
    }
}

/// A framebuffer service running on its own thread.
pub struct FbHandle {
    port: Port,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl FbHandle {
    /// Port clients connect to.
    pub fn port(&self) -> Port {
        self.port.clone()
    }

    /// Waits for the loop to end on its own.
    pub fn join(mut self) -> Result<(), ServerError> {
        self.wait()
    }

    /// Stops the loop and waits for its thread.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.port.shutdown();
        self.wait()
    }

    fn wait(&mut self) -> Result<(), ServerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServerError::Panicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for FbHandle {
    fn drop(&mut self) {
        self.port.shutdown();
        if let Err(err) = self.wait() {
            error!("fbd: service stopped with error: {err}");
        }
    }
}

/// Notifies init when the service is ready.
pub struct ReadyNotifier(Box<dyn FnOnce() + Send>);

impl ReadyNotifier {
    /// Creates a notifier from `func`.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(func))
    }

    /// Emits the ready marker.
    pub fn notify(self) {
        (self.0)();
    }
}

/// Starts the service, registers it under the configured name and serves until the port closes.
pub fn service_main_loop(config: &FbConfig, ns: &Arc<Session>, task: TaskId, notifier: ReadyNotifier) -> Result<(), ServerError> {
    let handle = FbServer::new(config)?.spawn()?;
    samgr::ns_intro(ns, task)?;
    samgr::service_register(ns, ServiceTag::named(&config.service), &handle.port())?;
    info!("fbd: registered as {}", config.service);
    notifier.notify();
    handle.join()
}
