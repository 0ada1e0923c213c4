// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sessions: a bundle of channels to one server, leased out one exchange at a time.

use core::fmt;
use core::ops::Deref;

use nexus_abi::{Sysarg, CALL_ARGS};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::phone::connect_me_to;
use crate::{IpcError, Phone, Port, Result};

/// How a session maps exchanges onto channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeMgmt {
    /// One channel; exchanges are serialized on it.
    Exclusive,
    /// Up to `max_channels` channels; each concurrent exchange gets its own.
    Parallel {
        /// Upper bound on open channels (values below 1 read as 1).
        max_channels: usize,
    },
}

impl ExchangeMgmt {
    fn bound(self) -> usize {
        match self {
            Self::Exclusive => 1,
            Self::Parallel { max_channels } => max_channels.max(1),
        }
    }
}

/// Opens additional channels to the server a session talks to.
pub trait Connector: Send + Sync {
    /// Returns a freshly connected phone.
    fn open_channel(&self) -> Result<Phone>;
}

/// Connector that sends connect-me-to straight to the server's port.
#[derive(Debug)]
pub struct DirectConnector {
    port: Port,
    args: [Sysarg; CALL_ARGS],
}

impl DirectConnector {
    /// Connects to `port`, passing `args` with every connect-me-to.
    pub fn new(port: Port, args: &[Sysarg]) -> Self {
        let mut words = [0; CALL_ARGS];
        for (dst, src) in words.iter_mut().zip(args) {
            *dst = *src;
        }
        Self { port, args: words }
    }
}

impl Connector for DirectConnector {
    fn open_channel(&self) -> Result<Phone> {
        connect_me_to(&self.port, &self.args)
    }
}

struct ChannelPool {
    idle: Vec<Phone>,
    leased: usize,
    ceiling: Option<usize>,
    closed: bool,
}

/// A client's logical connection to one server.
pub struct Session {
    mgmt: ExchangeMgmt,
    connector: Option<Box<dyn Connector>>,
    pool: Mutex<ChannelPool>,
    released: Condvar,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("mgmt", &self.mgmt).field("channels", &self.channel_count()).finish()
    }
}

impl Session {
    /// Wraps a connected phone. The session cannot grow beyond it.
    pub fn new(mgmt: ExchangeMgmt, phone: Phone) -> Self {
        Self::build(mgmt, phone, None)
    }

    /// Wraps a connected phone and a way to open more channels to the same server.
    pub fn with_connector(mgmt: ExchangeMgmt, phone: Phone, connector: impl Connector + 'static) -> Self {
        Self::build(mgmt, phone, Some(Box::new(connector)))
    }

    fn build(mgmt: ExchangeMgmt, phone: Phone, connector: Option<Box<dyn Connector>>) -> Self {
        Self {
            mgmt,
            connector,
            pool: Mutex::new(ChannelPool { idle: vec![phone], leased: 0, ceiling: None, closed: false }),
            released: Condvar::new(),
        }
    }

    /// Exchange management mode.
    pub fn mgmt(&self) -> ExchangeMgmt {
        self.mgmt
    }

    /// Channels currently open (idle or leased).
    pub fn channel_count(&self) -> usize {
        let pool = self.pool.lock();
        pool.idle.len() + pool.leased
    }

    fn limit(&self, pool: &ChannelPool) -> usize {
        let bound = self.mgmt.bound();
        pool.ceiling.map_or(bound, |ceiling| ceiling.min(bound))
    }

    /// Leases a channel for one request/answer sequence.
    ///
    /// Blocks while every allowed channel is leased. A parallel session whose server refuses
    /// another channel stops growing and reuses the channels it has.
    pub fn exchange(&self) -> Result<Exchange<'_>> {
        let mut pool = self.pool.lock();
        loop {
            if pool.closed {
                return Err(IpcError::Hangup);
            }
            while let Some(phone) = pool.idle.pop() {
                if phone.is_connected() {
                    pool.leased += 1;
                    return Ok(Exchange { session: self, phone });
                }
                log::debug!("ipc: discarding dead channel {}", phone.id());
            }
            if pool.leased < self.limit(&pool) {
                if let Some(connector) = &self.connector {
                    pool.leased += 1;
                    match MutexGuard::unlocked(&mut pool, || connector.open_channel()) {
                        Ok(phone) => return Ok(Exchange { session: self, phone }),
                        Err(err) => {
                            pool.leased -= 1;
                            if pool.leased == 0 {
                                return Err(err);
                            }
                            log::debug!("ipc: channel refused ({err}); capping session at {}", pool.leased);
                            pool.ceiling = Some(pool.leased);
                        }
                    }
                }
            }
            if pool.leased == 0 {
                return Err(IpcError::Hangup);
            }
            self.released.wait(&mut pool);
        }
    }

    fn release(&self, phone: Phone) {
        let mut pool = self.pool.lock();
        pool.leased = pool.leased.saturating_sub(1);
        if !pool.closed && phone.is_connected() {
            pool.idle.push(phone);
            drop(pool);
            self.released.notify_one();
        } else {
            drop(pool);
            drop(phone);
            self.released.notify_all();
        }
    }

    /// Hangs up idle channels and refuses new exchanges. Leased channels hang up on release.
    pub fn close(&self) {
        let idle = {
            let mut pool = self.pool.lock();
            pool.closed = true;
            core::mem::take(&mut pool.idle)
        };
        drop(idle);
        self.released.notify_all();
    }
}

/// A leased channel. Returned to its session on drop.
pub struct Exchange<'s> {
    session: &'s Session,
    phone: Phone,
}

impl fmt::Debug for Exchange<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange").field("phone", &self.phone).finish()
    }
}

impl Deref for Exchange<'_> {
    type Target = Phone;

    fn deref(&self) -> &Phone {
        &self.phone
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        let phone = core::mem::replace(&mut self.phone, Phone::detached());
        self.session.release(phone);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{answerbox, Answer, Answerbox, CallKind, Wait};
    use nexus_abi::Errno;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    const ECHO: Sysarg = 2000;
    const HOLD: Sysarg = 2001;

    /// Accepts up to `max_clients` channels; ECHO answers the channel id, HOLD parks the answer
    /// until the next ECHO on any channel.
    fn echo_server(inbox: Answerbox, max_clients: usize, accepted: Arc<AtomicUsize>) {
        let mut open = HashSet::new();
        let mut held = Vec::new();
        while let Ok(call) = inbox.recv(Wait::Blocking) {
            match call.kind() {
                CallKind::ConnectMeTo if open.len() < max_clients => {
                    open.insert(call.accept().unwrap());
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
                CallKind::ConnectMeTo => call.answer(Errno::ResourceLimit).unwrap(),
                CallKind::Hangup => {
                    open.remove(&call.channel());
                }
                CallKind::Application(HOLD) => held.push(call),
                CallKind::Application(ECHO) => {
                    for parked in held.drain(..) {
                        parked.answer(Answer::ok()).unwrap();
                    }
                    let id = call.channel().raw() as Sysarg;
                    call.answer(Answer::ok_with(&[id])).unwrap();
                }
                _ => call.answer(Errno::NotFound).unwrap(),
            }
        }
    }

    fn start(max_clients: usize, mgmt: ExchangeMgmt) -> (Arc<Session>, Arc<AtomicUsize>, Port) {
        let (port, inbox) = answerbox();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        thread::spawn(move || echo_server(inbox, max_clients, counter));
        let connector = DirectConnector::new(port.clone(), &[]);
        let first = connector.open_channel().unwrap();
        (Arc::new(Session::with_connector(mgmt, first, connector)), accepted, port)
    }

    #[test]
    fn exclusive_session_serializes_exchanges() {
        let (session, accepted, port) = start(4, ExchangeMgmt::Exclusive);
        let barrier = Arc::new(Barrier::new(4));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let exch = session.exchange().unwrap();
                    exch.call(ECHO, &[]).unwrap().arg(1)
                })
            })
            .collect();
        let ids: HashSet<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(session.channel_count(), 1);
        port.shutdown();
    }

    #[test]
    fn parallel_session_grows_to_bound() {
        let (session, accepted, port) = start(8, ExchangeMgmt::Parallel { max_channels: 2 });
        let first = session.exchange().unwrap();
        let second = session.exchange().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(session.channel_count(), 2);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let third = session.exchange().unwrap();
                tx.send(third.id()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        let released = first.id();
        drop(first);
        assert_eq!(rx.recv().unwrap(), released);
        waiter.join().unwrap();
        drop(second);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        port.shutdown();
    }

    #[test]
    fn parallel_session_caps_at_refusal() {
        let (session, accepted, port) = start(1, ExchangeMgmt::Parallel { max_channels: 3 });
        let first = session.exchange().unwrap();
        let _held = first.send(HOLD, &[]).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let exch = session.exchange().unwrap();
                tx.send(exch.call(ECHO, &[]).unwrap().arg(1)).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        let reused = first.id();
        drop(first);
        assert_eq!(rx.recv().unwrap(), reused.raw() as Sysarg);
        waiter.join().unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(session.channel_count(), 1);
        port.shutdown();
    }

    #[test]
    fn closed_session_refuses_exchanges() {
        let (session, _accepted, port) = start(1, ExchangeMgmt::Exclusive);
        session.close();
        assert_eq!(session.exchange().err(), Some(IpcError::Hangup));
        port.shutdown();
    }
}
