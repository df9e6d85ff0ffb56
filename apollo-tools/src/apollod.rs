//! Configuration daemon for an Apollo Twin.
//!
//! On start the stored configuration is pushed to the device. After that
//! the daemon polls the settings the front panel can change and writes
//! them through to the configuration file, so the file always reflects
//! the device.
//!
//! | signal | effect |
//! |--------|--------|
//! | SIGHUP | re-read the configuration file and push it to the device |
//! | SIGINT, SIGTERM | abort any in-flight control wait and exit |

use std::os::raw::c_int;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use apollo_audio::{ConfigStore, DeviceControl, Error, ShutdownHandle};
use apollo_tools::{init_logging, CommonArgs};
use clap::Parser;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(
    name = "apollod",
    version,
    about = "Keep an Apollo Twin in sync with its configuration file"
)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Poll interval in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 100)]
    interval_ms: u64,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static RELOAD: AtomicBool = AtomicBool::new(false);
static LINK: OnceLock<ShutdownHandle> = OnceLock::new();

extern "C" fn on_signal(signum: c_int) {
    if signum == Signal::SIGHUP as c_int {
        RELOAD.store(true, Ordering::SeqCst);
        return;
    }
    SHUTDOWN.store(true, Ordering::SeqCst);
    if let Some(link) = LINK.get() {
        link.trigger();
    }
}

fn install_signal_handlers() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
        // SAFETY: the handler only touches atomics.
        unsafe { signal::sigaction(sig, &action) }?;
    }
    Ok(())
}

/// Log a failed call and keep serving. Returns `false` once the device
/// is gone or the daemon is shutting down.
fn report(context: &str, err: &Error) -> bool {
    match err {
        Error::DeviceGone => {
            error!(kind = %err.kind(), "{context}: device removed");
            false
        }
        Error::Aborted => false,
        _ => {
            warn!(kind = %err.kind(), error = %err, hint = err.hint(), "{context} failed");
            true
        }
    }
}

fn sync(store: &mut ConfigStore, control: &dyn DeviceControl) -> bool {
    match store.sync(control) {
        Ok(()) => true,
        Err(err) => report("configuration sync", &err),
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    install_signal_handlers().context("installing signal handlers")?;

    let (pci, device) = args.common.attach()?;
    let _ = LINK.set(device.shutdown_handle());
    let control = device.control();
    info!(device = %pci.bdf, irq = pci.irq, "apollod started");

    let mut store = args.common.config_store();
    let interval = Duration::from_millis(args.interval_ms);
    let mut serving = sync(&mut store, &*control);

    while serving && !SHUTDOWN.load(Ordering::SeqCst) {
        if RELOAD.swap(false, Ordering::SeqCst) {
            info!(path = %store.path().display(), "reloading configuration");
            store.load();
            serving = sync(&mut store, &*control);
            continue;
        }
        match store.refresh(&*control) {
            Ok(true) => info!("configuration updated from device"),
            Ok(false) => {}
            Err(err) => serving = report("refresh", &err),
        }
        thread::sleep(interval);
    }

    info!("apollod stopping");
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(Level::INFO, args.common.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<Error>() {
                Some(apollo) => error!(kind = %apollo.kind(), hint = apollo.hint(), "{apollo}"),
                None => error!("{err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
