// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Receive queues (ports) and the calls delivered through them.

use core::fmt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nexus_abi::ipc::{IPC_M_CONNECT_ME_TO, IPC_M_CONNECT_TO_ME, IPC_M_PHONE_HUNGUP, IPC_M_SHARE_OUT};
use nexus_abi::{is_structural, Method, Sysarg};
use parking_lot::{Condvar, Mutex};

use crate::call::{Answer, Call, CallId};
use crate::phone::{ChannelId, ChannelState};
use crate::{IpcError, Result, SharedArea, Wait};

static NEXT_PORT: AtomicU64 = AtomicU64::new(1);

/// Identity of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Object travelling with a structural call.
pub(crate) enum Attachment {
    None,
    /// The not-yet-established channel a connect-me-to asks for.
    Channel(Arc<ChannelState>),
    /// The callback port offered by a connect-to-me.
    Port(Port),
    /// The memory offered by a share-out.
    Area(SharedArea),
}

/// Where the answer to a delivered call goes.
pub(crate) struct ReplyRoute {
    pub(crate) channel: Arc<ChannelState>,
    pub(crate) id: CallId,
}

/// A call in flight. Dropping an envelope that still owes an answer fails the caller's wait.
pub(crate) struct Envelope {
    pub(crate) channel: ChannelId,
    pub(crate) call: Call,
    pub(crate) attachment: Attachment,
    pub(crate) reply: Option<ReplyRoute>,
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if let Some(route) = self.reply.take() {
            route.channel.lose(route.id);
        }
    }
}

struct PortQueue {
    envelopes: VecDeque<Envelope>,
    closed: bool,
}

struct PortShared {
    id: PortId,
    queue: Mutex<PortQueue>,
    arrived: Condvar,
}

/// Sending side of a task's receive queue. Cheap to clone.
#[derive(Clone)]
pub struct Port {
    shared: Arc<PortShared>,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port").field("id", &self.shared.id).field("closed", &self.is_closed()).finish()
    }
}

impl Port {
    fn new() -> Self {
        let id = PortId(NEXT_PORT.fetch_add(1, Ordering::Relaxed));
        Self {
            shared: Arc::new(PortShared {
                id,
                queue: Mutex::new(PortQueue { envelopes: VecDeque::new(), closed: false }),
                arrived: Condvar::new(),
            }),
        }
    }

    /// Identity of the port.
    pub fn id(&self) -> PortId {
        self.shared.id
    }

    /// Returns `true` once the owner stopped receiving.
    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }

    /// Stops accepting calls. Queued calls are still delivered; receivers then observe
    /// [`IpcError::Hangup`].
    pub fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        queue.closed = true;
        self.shared.arrived.notify_all();
    }

    /// Appends an envelope. A closed port rejects it, which fails the sender's wait.
    pub(crate) fn post(&self, envelope: Envelope) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            drop(queue);
            drop(envelope);
            return Err(IpcError::Hangup);
        }
        queue.envelopes.push_back(envelope);
        self.shared.arrived.notify_one();
        Ok(())
    }

    fn same_port(&self, other: &Port) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Creates a receive queue, returning the sending handle and the receiving end.
pub fn answerbox() -> (Port, Answerbox) {
    let port = Port::new();
    (port.clone(), Answerbox { port })
}

/// Receiving end of a port. Dropping it shuts the port down and fails every queued call.
pub struct Answerbox {
    port: Port,
}

impl fmt::Debug for Answerbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Answerbox").field("port", &self.port).finish()
    }
}

impl Answerbox {
    /// Returns a sending handle for this answerbox.
    pub fn port(&self) -> Port {
        self.port.clone()
    }

    /// Takes the next delivered call in arrival order.
    pub fn recv(&self, wait: Wait) -> Result<IncomingCall> {
        let deadline = wait.timeout().map(|timeout| Instant::now() + timeout);
        let shared = &self.port.shared;
        let mut queue = shared.queue.lock();
        loop {
            if let Some(envelope) = queue.envelopes.pop_front() {
                return Ok(IncomingCall { envelope, port: self.port.clone() });
            }
            if queue.closed {
                return Err(IpcError::Hangup);
            }
            match (wait, deadline) {
                (Wait::NonBlocking, _) => return Err(IpcError::WouldBlock),
                (_, Some(deadline)) => {
                    if shared.arrived.wait_until(&mut queue, deadline).timed_out()
                        && queue.envelopes.is_empty()
                        && !queue.closed
                    {
                        return Err(IpcError::Timeout);
                    }
                }
                _ => shared.arrived.wait(&mut queue),
            }
        }
    }

    /// Number of calls waiting to be received.
    pub fn pending(&self) -> usize {
        self.port.shared.queue.lock().envelopes.len()
    }
}

impl Drop for Answerbox {
    fn drop(&mut self) {
        let drained = {
            let mut queue = self.port.shared.queue.lock();
            queue.closed = true;
            self.port.shared.arrived.notify_all();
            core::mem::take(&mut queue.envelopes)
        };
        drop(drained);
    }
}

/// Classification of a delivered call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// A peer asks for a new channel to this task.
    ConnectMeTo,
    /// A peer offers its own port to this task.
    ConnectToMe,
    /// A peer offers a shared memory area.
    ShareOut,
    /// A channel to this task was closed.
    Hangup,
    /// An application-defined method.
    Application(Method),
    /// A structural method this runtime does not implement.
    Unknown(Method),
}

/// One delivered call together with its reply route.
///
/// Dropping an unanswered call answers it implicitly with a hangup.
pub struct IncomingCall {
    envelope: Envelope,
    port: Port,
}

impl fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingCall")
            .field("channel", &self.envelope.channel)
            .field("call", &self.envelope.call)
            .finish()
    }
}

impl IncomingCall {
    /// Channel the call arrived on.
    pub fn channel(&self) -> ChannelId {
        self.envelope.channel
    }

    /// Method tag.
    pub fn method(&self) -> Method {
        self.envelope.call.method
    }

    /// The full call record.
    pub fn call(&self) -> &Call {
        &self.envelope.call
    }

    /// Returns argument `n` (1-based).
    pub fn arg(&self, n: usize) -> Sysarg {
        self.envelope.call.arg(n)
    }

    /// Classifies the method tag.
    pub fn kind(&self) -> CallKind {
        match self.method() {
            IPC_M_CONNECT_ME_TO => CallKind::ConnectMeTo,
            IPC_M_CONNECT_TO_ME => CallKind::ConnectToMe,
            IPC_M_SHARE_OUT => CallKind::ShareOut,
            IPC_M_PHONE_HUNGUP => CallKind::Hangup,
            method if is_structural(method) => CallKind::Unknown(method),
            method => CallKind::Application(method),
        }
    }

    /// Returns `true` unless the call is a notification that takes no answer.
    pub fn expects_answer(&self) -> bool {
        self.envelope.reply.is_some()
    }

    /// Channel a connect-me-to asks to establish.
    pub fn connecting_channel(&self) -> Option<ChannelId> {
        match &self.envelope.attachment {
            Attachment::Channel(state) => Some(state.id()),
            _ => None,
        }
    }

    /// Takes the callback port of a connect-to-me.
    pub fn take_port(&mut self) -> Option<Port> {
        match core::mem::replace(&mut self.envelope.attachment, Attachment::None) {
            Attachment::Port(port) => Some(port),
            other => {
                self.envelope.attachment = other;
                None
            }
        }
    }

    /// Takes (maps) the area offered by a share-out.
    pub fn take_area(&mut self) -> Option<SharedArea> {
        match core::mem::replace(&mut self.envelope.attachment, Attachment::None) {
            Attachment::Area(area) => Some(area),
            other => {
                self.envelope.attachment = other;
                None
            }
        }
    }

    /// Answers the call.
    ///
    /// A successful answer to a connect-me-to establishes the requested channel to the port
    /// the call was received on. Notifications take no answer and are simply consumed.
    pub fn answer(mut self, answer: impl Into<Answer>) -> Result<()> {
        let answer = answer.into();
        if answer.retval == 0 {
            if let Attachment::Channel(state) = &self.envelope.attachment {
                state.establish(self.port.clone());
            }
        }
        match self.envelope.reply.take() {
            Some(route) => route.channel.complete(route.id, answer),
            None => Ok(()),
        }
    }

    /// Accepts a connect-me-to and returns the id of the new channel.
    pub fn accept(self) -> Result<ChannelId> {
        let channel = self.connecting_channel().unwrap_or(self.envelope.channel);
        self.answer(Answer::ok())?;
        Ok(channel)
    }

    /// Passes the call to another task. The answer still travels back to the original caller.
    pub fn forward(self, to: &Port) -> Result<()> {
        if to.same_port(&self.port) {
            log::warn!("ipc: forwarding {} back to its own port", self.envelope.call.method);
        }
        let IncomingCall { envelope, .. } = self;
        to.post(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Phone;
    use core::time::Duration;

    #[test]
    fn recv_times_out_on_empty_queue() {
        let (_port, inbox) = answerbox();
        assert_eq!(inbox.recv(Wait::NonBlocking).err(), Some(IpcError::WouldBlock));
        assert_eq!(inbox.recv(Wait::Timeout(Duration::from_millis(10))).err(), Some(IpcError::Timeout));
    }

    #[test]
    fn shutdown_drains_then_hangs_up() {
        let (port, inbox) = answerbox();
        let phone = Phone::bootstrap(&port);
        let pending = phone.send(1100, &[1]).unwrap();
        port.shutdown();
        assert_eq!(phone.send(1100, &[2]).err(), Some(IpcError::Hangup));
        let call = inbox.recv(Wait::Blocking).unwrap();
        assert_eq!(call.arg(1), 1);
        call.answer(Answer::ok()).unwrap();
        assert!(pending.wait(Wait::Blocking).is_ok());
        assert_eq!(inbox.recv(Wait::Blocking).err(), Some(IpcError::Hangup));
    }

    #[test]
    fn calls_are_classified() {
        let (port, inbox) = answerbox();
        let phone = Phone::bootstrap(&port);
        let _app = phone.send(2000, &[]).unwrap();
        let _odd = phone.send(17, &[]).unwrap();
        assert_eq!(inbox.recv(Wait::Blocking).unwrap().kind(), CallKind::Application(2000));
        assert_eq!(inbox.recv(Wait::Blocking).unwrap().kind(), CallKind::Unknown(17));
        drop(phone);
        let hangup = inbox.recv(Wait::Blocking).unwrap();
        assert_eq!(hangup.kind(), CallKind::Hangup);
        assert!(!hangup.expects_answer());
    }

    #[test]
    fn dropped_answerbox_fails_queued_calls() {
        let (port, inbox) = answerbox();
        let phone = Phone::bootstrap(&port);
        let pending = phone.send(1100, &[]).unwrap();
        drop(inbox);
        assert_eq!(pending.wait(Wait::Blocking).err(), Some(IpcError::Hangup));
    }
}
