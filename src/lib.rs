//! A connection engine for the Binary Floor Control Protocol (BFCP):
//! transport setup, message framing, transaction tracking, and
//! retransmission, over TCP, TLS, or UDP.
//!
//! Full BFCP primitive parsing is out of scope — see [`message`] — this
//! crate owns getting bytes reliably on and off the wire, matched up with
//! their transactions, and delivered to an application-supplied
//! [`endpoint::EndpointHandler`].

pub mod async_runtime;
pub mod endpoint;
pub mod error;
pub mod globals;
pub mod message;
pub mod peer;
pub mod transaction;
pub mod transport;

use std::sync::atomic::{AtomicUsize, Ordering};

use globals::Flag;

static INITIALIZED: Flag = Flag::new();
static RUNTIME: parking_lot::Mutex<Option<async_runtime::Runtime>> = parking_lot::Mutex::new(None);
static INIT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Initializes the crate-wide async runtime. Safe to call more than once;
/// only the first call builds a runtime, and each call increments a
/// reference count decremented by [`shutdown`].
///
/// Grounded on the teacher crate's own `init`/`drop`-guard pattern: a
/// process can have at most one live runtime, and repeated `init`/
/// `shutdown` pairs (e.g. across test modules) must not double-build or
/// prematurely tear it down.
pub fn init(num_threads: usize) -> Result<(), error::Error> {
    if INIT_COUNT.fetch_add(1, Ordering::AcqRel) == 0 {
        let rt = async_runtime::init(num_threads)
            .map_err(|_| error::Error::simple(error::ErrorKind::TransportSetupError))?;
        *RUNTIME.lock() = Some(rt);
        INITIALIZED.set();
    }
    Ok(())
}

/// Decrements the init reference count, tearing down the runtime once it
/// reaches zero. A no-op if `init` was never called.
pub fn shutdown() {
    if !INITIALIZED.test() {
        return;
    }
    if INIT_COUNT.fetch_sub(1, Ordering::AcqRel) == 1 {
        INITIALIZED.unset();
        if let Some(rt) = RUNTIME.lock().take() {
            rt.shutdown_background();
        }
    }
}

/// Runs `fut` to completion on the crate-wide runtime, blocking the
/// calling thread. Panics if [`init`] has not been called.
pub fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    let guard = RUNTIME.lock();
    let rt = guard.as_ref().expect("bfcp_engine::init must be called before block_on");
    rt.block_on(fut)
}
