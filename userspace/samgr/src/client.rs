// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client side of the naming service.

use std::sync::Arc;

use nexus_abi::ipc::IPC_FLAG_BLOCKING;
use nexus_abi::ns::{NS_ID_INTRO, NS_PING};
use nexus_abi::{ServiceTag, Sysarg, TaskId};
use nexus_ipc::{Connector, ExchangeMgmt, Phone, Port, Session};

use crate::{Error, Result};

/// Opens channels to a service through the naming service.
pub struct NsConnector {
    ns: Arc<Session>,
    tag: ServiceTag,
    arg2: Sysarg,
    arg3: Sysarg,
    flags: usize,
}

impl NsConnector {
    /// Connector for `tag`; `blocking` waits for the service to be registered.
    ///
    /// `arg2` and `arg3` travel unchanged to the provider's accept handler.
    pub fn new(ns: Arc<Session>, tag: ServiceTag, arg2: Sysarg, arg3: Sysarg, blocking: bool) -> Self {
        Self { ns, tag, arg2, arg3, flags: if blocking { IPC_FLAG_BLOCKING } else { 0 } }
    }
}

impl Connector for NsConnector {
    fn open_channel(&self) -> nexus_ipc::Result<Phone> {
        let exch = self.ns.exchange()?;
        exch.connect_me_to(self.tag.raw(), self.arg2, self.arg3, self.flags)
    }
}

/// Checks that the naming service answers.
pub fn ns_ping(ns: &Session) -> Result<()> {
    ns.exchange()?.request(NS_PING, &[])?;
    Ok(())
}

/// Announces the calling task's identity on its naming-service channel.
pub fn ns_intro(ns: &Session, task: TaskId) -> Result<()> {
    let (low, high) = task.to_words();
    ns.exchange()?.request(NS_ID_INTRO, &[low, high])?;
    Ok(())
}

/// Registers `callback` as the provider of `tag`. Requires a prior [`ns_intro`].
pub fn service_register(ns: &Session, tag: ServiceTag, callback: &Port) -> Result<()> {
    let exch = ns.exchange()?;
    exch.connect_to_me(&[tag.raw()], callback)?.into_result()?;
    Ok(())
}

/// Connects to `tag`, failing with [`Error::NotFound`] when no provider is registered.
///
/// `arg2` and `arg3` reach the provider with every channel the session opens.
pub fn service_connect(
    ns: &Arc<Session>,
    tag: ServiceTag,
    mgmt: ExchangeMgmt,
    arg2: Sysarg,
    arg3: Sysarg,
) -> Result<Session> {
    open(NsConnector::new(Arc::clone(ns), tag, arg2, arg3, false), mgmt)
}

/// Connects to `tag`, waiting until a provider registers.
pub fn service_connect_blocking(
    ns: &Arc<Session>,
    tag: ServiceTag,
    mgmt: ExchangeMgmt,
    arg2: Sysarg,
    arg3: Sysarg,
) -> Result<Session> {
    open(NsConnector::new(Arc::clone(ns), tag, arg2, arg3, true), mgmt)
}

fn open(connector: NsConnector, mgmt: ExchangeMgmt) -> Result<Session> {
    let tag = connector.tag;
    let phone = connector.open_channel().map_err(Error::from)?;
    log::debug!("samgr: connected to {tag} over {}", phone.id());
    Ok(Session::with_connector(mgmt, phone, connector))
}
