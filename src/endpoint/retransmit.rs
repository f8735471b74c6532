//! The retransmit-timer worker: sweeps the outbound transaction table on
//! its own task, re-sending due requests and reporting hard expiries.
//!
//! Grounded on `original_source`'s `BFCPConnection::ManageRetransmission`
//! (`BFCPconnection.cpp` lines ~597-704): the same per-iteration walk —
//! fold alive expirations into the next wake-up, collect due
//! retransmissions, stop at the first permanent expiry — reexpressed with
//! a `Notify`/`Delay` race instead of `pthread_cond_timedwait`.

use std::collections::HashMap;
use std::sync::Arc;

use futures::lock::Mutex as AsyncMutex;
use tokio::sync::Notify;

use crate::endpoint::EndpointHandler;
use crate::globals::Flag;
use crate::peer::PeerChannel;
use crate::transaction::TransactionTable;
use crate::transport::SocketHandle;

type PeerMap = Arc<AsyncMutex<HashMap<SocketHandle, PeerChannel>>>;

pub(crate) async fn run(
    handler: Arc<dyn EndpointHandler>,
    peers: PeerMap,
    transactions: Arc<TransactionTable>,
    close: Arc<Flag>,
    notify: Arc<Notify>,
) {
    loop {
        if close.test() {
            break;
        }

        let outcome = transactions.sweep();

        if let Some((transaction_id, socket)) = outcome.permanently_expired {
            transactions.close(transaction_id);
            handler.on_disconnected(socket);
        }

        for due in outcome.due {
            let mut peers_guard = peers.lock().await;
            let Some(peer) = peers_guard.get_mut(&due.socket) else {
                continue;
            };
            if peer.send_data(&due.message).await.is_err() {
                drop(peers_guard);
                transactions.close(due.transaction_id);
                handler.on_disconnected(due.socket);
            }
        }

        if close.test() {
            break;
        }

        let sleep_for = outcome.next_wakeup.saturating_duration_since(std::time::Instant::now());
        tokio::select! {
            _ = futures_timer::Delay::new(sleep_for) => {}
            _ = notify.notified() => {}
        }
    }
}
