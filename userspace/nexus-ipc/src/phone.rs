// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Channels: the initiating end (phone) and the shared call table behind it.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nexus_abi::ipc::{IPC_M_CONNECT_ME_TO, IPC_M_CONNECT_TO_ME, IPC_M_PHONE_HUNGUP, IPC_M_SHARE_OUT};
use nexus_abi::{Method, Sysarg};
use parking_lot::{Condvar, Mutex};

use crate::call::{Answer, Call, CallId, PendingCalls};
use crate::port::{Attachment, Envelope, Port, ReplyRoute};
use crate::{IpcError, Result, SharedArea, Wait};

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

/// Identity of a channel, as seen by the receiving task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Returns the raw identifier value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

enum Link {
    Connecting,
    Established(Port),
    Closed,
}

struct ChannelInner {
    link: Link,
    calls: PendingCalls,
}

/// State shared between a phone and the reply routes of its calls.
pub(crate) struct ChannelState {
    id: ChannelId,
    inner: Mutex<ChannelInner>,
    answered: Condvar,
}

impl ChannelState {
    fn new(link: Link) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed)),
            inner: Mutex::new(ChannelInner { link, calls: PendingCalls::new() }),
            answered: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    /// Connects a channel that is still waiting for its connect-me-to answer.
    pub(crate) fn establish(&self, port: Port) {
        let mut inner = self.inner.lock();
        if matches!(inner.link, Link::Connecting) {
            inner.link = Link::Established(port);
        }
    }

    pub(crate) fn complete(&self, id: CallId, answer: Answer) -> Result<()> {
        let mut inner = self.inner.lock();
        let result = inner.calls.complete(id, answer);
        self.answered.notify_all();
        result
    }

    pub(crate) fn lose(&self, id: CallId) {
        let mut inner = self.inner.lock();
        inner.calls.lose(id);
        self.answered.notify_all();
    }

    fn is_connected(&self) -> bool {
        matches!(self.inner.lock().link, Link::Established(_))
    }

    fn close(&self) -> Option<Port> {
        let mut inner = self.inner.lock();
        match core::mem::replace(&mut inner.link, Link::Closed) {
            Link::Established(port) => Some(port),
            Link::Connecting | Link::Closed => None,
        }
    }

    fn await_answer(&self, id: CallId, wait: Wait) -> Result<Answer> {
        let deadline = wait.timeout().map(|timeout| Instant::now() + timeout);
        let mut inner = self.inner.lock();
        loop {
            if let Some(answer) = inner.calls.take(id)? {
                return Ok(answer);
            }
            match (wait, deadline) {
                (Wait::NonBlocking, _) => return Err(IpcError::WouldBlock),
                (_, Some(deadline)) => {
                    if self.answered.wait_until(&mut inner, deadline).timed_out() {
                        if let Some(answer) = inner.calls.take(id)? {
                            return Ok(answer);
                        }
                        inner.calls.abandon(id);
                        return Err(IpcError::Timeout);
                    }
                }
                _ => self.answered.wait(&mut inner),
            }
        }
    }

    /// Posts `call` over the channel and records its slot.
    fn dispatch(self: &Arc<Self>, call: Call, attachment: Attachment) -> Result<PendingCall> {
        let (port, id) = {
            let mut inner = self.inner.lock();
            let port = match &inner.link {
                Link::Established(port) => port.clone(),
                Link::Connecting => return Err(IpcError::WouldBlock),
                Link::Closed => return Err(IpcError::Hangup),
            };
            (port, inner.calls.issue())
        };
        let envelope = Envelope {
            channel: self.id,
            call,
            attachment,
            reply: Some(ReplyRoute { channel: Arc::clone(self), id }),
        };
        if let Err(err) = port.post(envelope) {
            let mut inner = self.inner.lock();
            inner.calls.abandon(id);
            inner.link = Link::Closed;
            return Err(err);
        }
        Ok(PendingCall { state: Arc::clone(self), id })
    }
}

/// An answer that has not arrived yet.
#[must_use = "dropping a PendingCall discards the answer"]
pub struct PendingCall {
    state: Arc<ChannelState>,
    id: CallId,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall").field("channel", &self.state.id).field("id", &self.id).finish()
    }
}

impl PendingCall {
    /// Id of the outstanding call.
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Waits for the answer.
    pub fn wait(self, wait: Wait) -> Result<Answer> {
        self.state.await_answer(self.id, wait)
    }
}

/// The initiating end of a channel. Dropping it hangs up.
pub struct Phone {
    state: Arc<ChannelState>,
}

impl fmt::Debug for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phone").field("id", &self.state.id).field("connected", &self.is_connected()).finish()
    }
}

impl Phone {
    /// Wraps an already connected channel to `port`, as handed to a task at spawn time.
    pub fn bootstrap(port: &Port) -> Self {
        Self { state: ChannelState::new(Link::Established(port.clone())) }
    }

    /// A phone that was never connected; dropping it is a no-op.
    pub(crate) fn detached() -> Self {
        Self { state: ChannelState::new(Link::Closed) }
    }

    /// Channel identity.
    pub fn id(&self) -> ChannelId {
        self.state.id
    }

    /// Returns `true` while calls can be sent.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Sends a call and returns a handle to its answer.
    pub fn send(&self, method: Method, args: &[Sysarg]) -> Result<PendingCall> {
        self.state.dispatch(Call::new(method, args), Attachment::None)
    }

    /// Sends a call and returns its id; collect the answer with [`Phone::await_answer`].
    pub fn issue_call(&self, method: Method, args: &[Sysarg]) -> Result<CallId> {
        self.send(method, args).map(|pending| pending.id())
    }

    /// Waits for the answer to a call previously issued on this phone.
    pub fn await_answer(&self, id: CallId, wait: Wait) -> Result<Answer> {
        self.state.await_answer(id, wait)
    }

    /// Sends a call and blocks for its answer.
    pub fn call(&self, method: Method, args: &[Sysarg]) -> Result<Answer> {
        self.send(method, args)?.wait(Wait::Blocking)
    }

    /// Sends a call and returns its answer words, turning an error status into [`IpcError::Status`].
    pub fn request(&self, method: Method, args: &[Sysarg]) -> Result<[Sysarg; nexus_abi::CALL_ARGS]> {
        self.call(method, args)?.into_result()
    }

    /// Asks the receiving task for a new channel to `target` (forwarded or served directly).
    pub fn connect_me_to(&self, target: Sysarg, arg2: Sysarg, arg3: Sysarg, flags: Sysarg) -> Result<Phone> {
        let state = ChannelState::new(Link::Connecting);
        let pending = self.state.dispatch(
            Call::new(IPC_M_CONNECT_ME_TO, &[target, arg2, arg3, flags]),
            Attachment::Channel(Arc::clone(&state)),
        )?;
        pending.wait(Wait::Blocking)?.into_result()?;
        if !state.is_connected() {
            return Err(IpcError::Hangup);
        }
        Ok(Phone { state })
    }

    /// Offers `callback` to the receiving task so that it can open channels back to us.
    pub fn connect_to_me(&self, args: &[Sysarg], callback: &Port) -> Result<Answer> {
        self.state
            .dispatch(Call::new(IPC_M_CONNECT_TO_ME, args), Attachment::Port(callback.clone()))?
            .wait(Wait::Blocking)
    }

    /// Offers `area` under `id`. The receiver may map it with at most the area's flags.
    pub fn share_out(&self, id: Sysarg, area: &SharedArea) -> Result<Answer> {
        let args = [id, area.len(), area.flags().bits() as Sysarg];
        self.state
            .dispatch(Call::new(IPC_M_SHARE_OUT, &args), Attachment::Area(area.clone()))?
            .wait(Wait::Blocking)
    }

    /// Closes the channel; the receiving task observes a hangup notification.
    pub fn hangup(self) {
        drop(self);
    }
}

impl Drop for Phone {
    fn drop(&mut self) {
        if let Some(port) = self.state.close() {
            let notice = Envelope {
                channel: self.state.id,
                call: Call::new(IPC_M_PHONE_HUNGUP, &[]),
                attachment: Attachment::None,
                reply: None,
            };
            if port.post(notice).is_err() {
                log::trace!("ipc: {} hung up after its peer closed", self.state.id);
            }
        }
    }
}

/// Opens a channel to `port` by sending a connect-me-to directly to it.
pub fn connect_me_to(port: &Port, args: &[Sysarg]) -> Result<Phone> {
    let state = ChannelState::new(Link::Connecting);
    let id = state.inner.lock().calls.issue();
    let envelope = Envelope {
        channel: state.id,
        call: Call::new(IPC_M_CONNECT_ME_TO, args),
        attachment: Attachment::Channel(Arc::clone(&state)),
        reply: Some(ReplyRoute { channel: Arc::clone(&state), id }),
    };
    port.post(envelope)?;
    state.await_answer(id, Wait::Blocking)?.into_result()?;
    if !state.is_connected() {
        return Err(IpcError::Hangup);
    }
    Ok(Phone { state })
}
