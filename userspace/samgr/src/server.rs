// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The naming service loop.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nexus_abi::ipc::IPC_FLAG_BLOCKING;
use nexus_abi::ns::{NS_ID_INTRO, NS_PING};
use nexus_abi::{Errno, ServiceTag, TaskId};
use nexus_ipc::{answerbox, Answer, Answerbox, CallKind, ChannelId, ExchangeMgmt, IncomingCall, Phone, Port, Session, Wait};

use crate::{Error, Registry};

struct ParkedConnect {
    tag: ServiceTag,
    call: IncomingCall,
}

/// Naming service state: registrations, task introductions and parked connection requests.
pub struct NameServer {
    registry: Arc<Registry>,
    intros: HashMap<ChannelId, TaskId>,
    parked: Vec<ParkedConnect>,
}

impl NameServer {
    /// Creates a naming service backed by `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry, intros: HashMap::new(), parked: Vec::new() }
    }

    /// Serves calls until the answerbox's port shuts down.
    pub fn run(&mut self, inbox: &Answerbox) {
        log::info!("samgr: serving on {}", inbox.port().id());
        while let Ok(call) = inbox.recv(Wait::Blocking) {
            self.handle(call);
        }
        log::info!("samgr: port closed, {} parked requests dropped", self.parked.len());
        self.parked.clear();
    }

    /// Handles one delivered call.
    pub fn handle(&mut self, call: IncomingCall) {
        let outcome = match call.kind() {
            CallKind::ConnectToMe => self.register(call),
            CallKind::ConnectMeTo => self.connect(call),
            CallKind::Hangup => {
                self.hangup(call.channel());
                Ok(())
            }
            CallKind::Application(NS_PING) => call.answer(Answer::ok()),
            CallKind::Application(NS_ID_INTRO) => self.introduce(call),
            CallKind::ShareOut | CallKind::Application(_) | CallKind::Unknown(_) => call.answer(Errno::NotFound),
        };
        if let Err(err) = outcome {
            log::debug!("samgr: answer not delivered: {err}");
        }
    }

    /// Number of connection requests waiting for a provider.
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    fn introduce(&mut self, call: IncomingCall) -> nexus_ipc::Result<()> {
        let task = TaskId::from_words(call.arg(1), call.arg(2));
        if self.intros.contains_key(&call.channel()) {
            return call.answer(Errno::AlreadyRegistered);
        }
        log::debug!("samgr: {} introduced as task {}", call.channel(), task.0);
        self.intros.insert(call.channel(), task);
        call.answer(Answer::ok())
    }

    fn register(&mut self, mut call: IncomingCall) -> nexus_ipc::Result<()> {
        let tag = ServiceTag::new(call.arg(1));
        let owner = call.channel();
        let Some(task) = self.intros.get(&owner).copied() else {
            log::warn!("samgr: {owner} registered {tag} without introducing itself");
            return call.answer(Error::NotIntroduced.errno());
        };
        let Some(port) = call.take_port() else {
            return call.answer(Errno::InvalidArgument);
        };
        match self.registry.register(tag, port, owner) {
            Ok(handle) => {
                log::info!("samgr: {tag} provided by task {} (generation {})", task.0, handle.generation.value());
                call.answer(Answer::ok())?;
                self.release_parked(tag);
                Ok(())
            }
            Err(err) => call.answer(err.errno()),
        }
    }

    fn connect(&mut self, call: IncomingCall) -> nexus_ipc::Result<()> {
        let tag = ServiceTag::new(call.arg(1));
        let blocking = call.arg(4) & IPC_FLAG_BLOCKING != 0;
        match self.provider(tag) {
            Some(port) => call.forward(&port),
            None if blocking => {
                log::debug!("samgr: parking connect to {tag} from {}", call.channel());
                self.parked.push(ParkedConnect { tag, call });
                Ok(())
            }
            None => call.answer(Error::NotFound.errno()),
        }
    }

    fn provider(&self, tag: ServiceTag) -> Option<Port> {
        let (_, port) = self.registry.resolve(tag).ok()?;
        if port.is_closed() {
            log::info!("samgr: provider of {tag} is gone");
            if let Err(err) = self.registry.unregister(tag) {
                log::debug!("samgr: {tag} already unregistered: {err}");
            }
            return None;
        }
        Some(port)
    }

    fn release_parked(&mut self, tag: ServiceTag) {
        let Some(port) = self.provider(tag) else {
            return;
        };
        let (ready, waiting): (Vec<_>, Vec<_>) = self.parked.drain(..).partition(|parked| parked.tag == tag);
        self.parked = waiting;
        for parked in ready {
            if let Err(err) = parked.call.forward(&port) {
                log::debug!("samgr: parked connect to {tag} lost: {err}");
            }
        }
    }

    fn hangup(&mut self, channel: ChannelId) {
        self.intros.remove(&channel);
        for tag in self.registry.unregister_owner(channel) {
            log::info!("samgr: {tag} unregistered, provider hung up");
        }
        self.parked.retain(|parked| parked.call.channel() != channel);
    }
}

/// A naming service running on its own thread.
pub struct NameServerHandle {
    port: Port,
    registry: Arc<Registry>,
    thread: Option<JoinHandle<()>>,
}

impl NameServerHandle {
    /// Port tasks are bootstrapped with.
    pub fn port(&self) -> Port {
        self.port.clone()
    }

    /// Shared view of the registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// A fresh naming-service session for one task.
    pub fn session(&self) -> Arc<Session> {
        Arc::new(Session::new(ExchangeMgmt::Exclusive, Phone::bootstrap(&self.port)))
    }

    /// Stops the service and waits for its thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.port.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("samgr: service thread panicked");
            }
        }
    }
}

impl Drop for NameServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts the naming service on a new thread.
pub fn spawn() -> io::Result<NameServerHandle> {
    let registry = Arc::new(Registry::new());
    let (port, inbox) = answerbox();
    let shared = Arc::clone(&registry);
    let thread = thread::Builder::new().name("samgr".into()).spawn(move || {
        NameServer::new(shared).run(&inbox);
    })?;
    Ok(NameServerHandle { port, registry, thread: Some(thread) })
}
