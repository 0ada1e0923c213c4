//! CONTEXT: Framebuffer end-to-end tests through the naming service
//! INTENT: Clients reach fbd by name; the service admits one client at a time
//! DEPS: samgr (naming), fbd (framebuffer service)
//! READINESS: fbd introduced and registered before clients connect, except where noted
//! TESTS: Named connect, exclusive admission, connect parked until registration

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use fbd::{FbClient, FbConfig, FbHandle, FbServer};
use nexus_abi::{Errno, ServiceTag, TaskId};
use nexus_ipc::{ExchangeMgmt, IpcError, Session};
use samgr::{ns_intro, service_connect_blocking, service_register, NameServerHandle};

const FBD_TASK: TaskId = TaskId(2);

/// Starts fbd and registers it. The registration lasts as long as the returned naming session.
fn publish(ns: &NameServerHandle, config: &FbConfig) -> (FbHandle, Arc<Session>) {
    let fbd = FbServer::new(config).unwrap().spawn().unwrap();
    let provider = ns.session();
    ns_intro(&provider, FBD_TASK).unwrap();
    service_register(&provider, ServiceTag::named(&config.service), &fbd.port()).unwrap();
    (fbd, provider)
}

fn open(ns: &NameServerHandle) -> samgr::Result<FbClient> {
    service_connect_blocking(&ns.session(), ServiceTag::named("disp1"), ExchangeMgmt::Exclusive, 0, 0).map(FbClient::new)
}

#[test]
fn one_client_at_a_time() {
    let ns = samgr::spawn().unwrap();
    let (fbd, _provider) = publish(&ns, &FbConfig::default());

    let first = open(&ns).unwrap();
    assert_eq!(first.grid_size().unwrap(), (30, 80));
    assert_eq!(
        open(&ns).err(),
        Some(samgr::Error::Ipc(IpcError::Status(Errno::ResourceLimit)))
    );

    drop(first);
    let second = open(&ns).unwrap();
    assert_eq!(second.grid_size().unwrap(), (30, 80));
    assert_eq!(second.resolution().unwrap(), (640, 480));

    drop(second);
    fbd.shutdown().unwrap();
}

#[test]
fn connect_waits_for_registration() {
    let ns = samgr::spawn().unwrap();
    let client_ns = ns.session();
    let (tx, rx) = mpsc::channel();
    let client = thread::spawn(move || {
        let session = service_connect_blocking(&client_ns, ServiceTag::named("disp1"), ExchangeMgmt::Exclusive, 0, 0).unwrap();
        tx.send(FbClient::new(session).grid_size().unwrap()).unwrap();
    });
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    let (fbd, _provider) = publish(&ns, &FbConfig::default());
    assert_eq!(rx.recv().unwrap(), (30, 80));
    client.join().unwrap();
    fbd.shutdown().unwrap();
}
