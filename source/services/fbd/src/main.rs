//! CONTEXT: Fbd entrypoint booting a host naming service and serving the framebuffer

use std::path::PathBuf;
use std::process;

use fbd::{FbConfig, ReadyNotifier};
use nexus_abi::TaskId;

const FBD_TASK: TaskId = TaskId(2);

fn main() {
    env_logger::init();
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => FbConfig::load(&path),
        None => Ok(FbConfig::default()),
    };
    let config = config.unwrap_or_else(|err| {
        eprintln!("fbd: {err}");
        process::exit(2);
    });
    let ns = match samgr::spawn() {
        Ok(ns) => ns,
        Err(err) => {
            eprintln!("fbd: failed to start naming service: {err}");
            process::exit(1);
        }
    };
    let service = config.service.clone();
    let notifier = ReadyNotifier::new(move || println!("fbd: ready ({service})"));
    if let Err(err) = fbd::service_main_loop(&config, &ns.session(), FBD_TASK, notifier) {
        eprintln!("fbd: exited with error: {err}");
        process::exit(1);
    }
}
