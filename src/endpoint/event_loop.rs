//! The single-task reactor driving reads, accepts, and dispatch.
//!
//! Grounded on `original_source`'s `BFCPConnection::RunLoop`
//! (`BFCPconnection.cpp` lines ~964-1257): the same per-iteration shape —
//! wait for readiness, service the anchor, service every peer, reap
//! disconnects — reexpressed as a `tokio::select!` over a `FuturesUnordered`
//! of per-peer read futures instead of a raw `select()`/`fd_set` rebuild,
//! following the teacher crate's own task-based worker-loop idiom
//! (`Node::rx_side_accept`).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::lock::Mutex as AsyncMutex;
use futures::stream::{FuturesUnordered, StreamExt};
use rustls::ServerConfig;
use tokio::sync::{mpsc, Notify};

use super::{close_outgoing_transaction, AnchorListener};
use crate::endpoint::EndpointHandler;
use crate::globals::Flag;
use crate::message::BfcpMessage;
use crate::peer::{PeerChannel, ReadOutcome};
use crate::transaction::{AnswerExpiry, TransactionTable};
use crate::transport::{Role, SocketHandle, Transport};

type PeerMap = Arc<AsyncMutex<HashMap<SocketHandle, PeerChannel>>>;
type ReadFuture = Pin<Box<dyn Future<Output = (SocketHandle, Option<ReadOutcome>)> + Send>>;

const IDLE_POLL: Duration = Duration::from_secs(1);

/// Waits for the peer's socket to become readable *without* removing it
/// from the table — `PeerChannel::readiness` hands back an owned future
/// cloned off the underlying socket handle, so the peer stays visible to
/// `Endpoint::send`/`add_client`/accessors for the entire wait. Only once
/// data is actually ready is the peer briefly removed, read, and
/// reinserted, bounding the window during which it is absent from the
/// table to the read itself rather than however long it takes to arrive.
/// `None` means the peer was concurrently removed by another task; the
/// caller just resynchronizes on the next outer iteration.
async fn read_one(peers: PeerMap, handle: SocketHandle, strict: bool) -> (SocketHandle, Option<ReadOutcome>) {
    let waiter = match peers.lock().await.get(&handle) {
        Some(peer) => peer.readiness(),
        None => return (handle, None),
    };
    if let Err(e) = waiter.await {
        return (handle, Some(ReadOutcome::Fatal(e.into())));
    }

    let mut peer = match peers.lock().await.remove(&handle) {
        Some(p) => p,
        None => return (handle, None),
    };
    let outcome = peer.read_data(strict).await;
    peers.lock().await.insert(handle, peer);
    (handle, Some(outcome))
}

enum Accepted {
    Tcp(crate::transport::tcp::Socket, SocketAddr),
    TlsRaw(crate::transport::tcp::Socket, SocketAddr),
}

/// Resolves once a pending connection is accepted on the anchor listener,
/// or never if there is no listener (UDP/active-stream Endpoints).
async fn accept_one(anchor_listener: &AsyncMutex<Option<AnchorListener>>) -> Option<Accepted> {
    let guard = anchor_listener.lock().await;
    match guard.as_ref() {
        Some(AnchorListener { listener, is_tls }) => {
            let is_tls = *is_tls;
            match listener.accept().await {
                Ok((sock, addr)) if is_tls => Some(Accepted::TlsRaw(sock, addr)),
                Ok((sock, addr)) => Some(Accepted::Tcp(sock, addr)),
                Err(_) => None,
            }
        }
        None => {
            drop(guard);
            futures::future::pending().await
        }
    }
}

pub(crate) async fn run(
    handler: Arc<dyn EndpointHandler>,
    peers: PeerMap,
    transactions: Arc<TransactionTable>,
    anchor: SocketHandle,
    anchor_listener: Arc<AsyncMutex<Option<AnchorListener>>>,
    mut wake_rx: mpsc::UnboundedReceiver<()>,
    close: Arc<Flag>,
    retransmit_notify: Arc<Notify>,
    strict_remote_address: bool,
    tls_server_config: Option<Arc<ServerConfig>>,
) {
    // Kept outside the loop body so in-flight `read_one` futures survive
    // across iterations: rebuilding this fresh every pass would make
    // `select!` treat every unresolved read as a losing branch to drop,
    // which silently forgets whichever peer it belonged to. `in_flight`
    // tracks which peers already have a queued read so a peer isn't
    // queued twice while its previous read is still outstanding.
    let mut reads: FuturesUnordered<ReadFuture> = FuturesUnordered::new();
    let mut in_flight: HashSet<SocketHandle> = HashSet::new();

    loop {
        if close.test() {
            break;
        }

        let handles: Vec<SocketHandle> = peers.lock().await.keys().copied().collect();
        for h in handles {
            if in_flight.insert(h) {
                reads.push(Box::pin(read_one(peers.clone(), h, strict_remote_address)));
            }
        }
        // Always keep at least one pending future alive so `reads.next()`
        // never resolves to `None` (a finished stream) when there are no
        // queued reads; real readiness still comes from the other
        // `select!` arms in that case.
        if reads.is_empty() {
            reads.push(Box::pin(futures::future::pending()));
        }

        tokio::select! {
            _ = tokio::time::sleep(IDLE_POLL) => {}
            woken = wake_rx.recv() => {
                if woken.is_none() {
                    break;
                }
            }
            accepted = accept_one(&anchor_listener) => {
                if let Some(accepted) = accepted {
                    handle_accept(&handler, &peers, &tls_server_config, accepted).await;
                }
            }
            Some((handle, outcome)) = reads.next() => {
                in_flight.remove(&handle);
                if let Some(outcome) = outcome {
                    handle_read_outcome(&handler, &peers, &transactions, &retransmit_notify, anchor, handle, outcome).await;
                }
            }
        }

        sweep_answer_caches(&handler, &peers).await;
    }

    // final drain: anything left in the table was closed by `disconnect`
    // already; nothing further to do.
}

async fn handle_accept(
    handler: &Arc<dyn EndpointHandler>,
    peers: &PeerMap,
    tls_server_config: &Option<Arc<ServerConfig>>,
    accepted: Accepted,
) {
    let handle = SocketHandle::next();
    match accepted {
        Accepted::Tcp(sock, addr) => {
            let peer = PeerChannel::new_tcp(handle, Role::Passive, sock);
            peers.lock().await.insert(handle, peer);
            handler.on_connected(handle, addr);
        }
        Accepted::TlsRaw(sock, addr) => {
            let Some(cfg) = tls_server_config.clone() else {
                return;
            };
            match crate::transport::tls::handshake_server(cfg, sock).await {
                Ok(tls_sock) => {
                    let peer = PeerChannel::new_tls_server(handle, Role::Passive, addr, tls_sock);
                    peers.lock().await.insert(handle, peer);
                    handler.on_connected(handle, addr);
                }
                Err(_) => {}
            }
        }
    }
}

async fn handle_read_outcome(
    handler: &Arc<dyn EndpointHandler>,
    peers: &PeerMap,
    transactions: &TransactionTable,
    retransmit_notify: &Notify,
    anchor: SocketHandle,
    handle: SocketHandle,
    outcome: ReadOutcome,
) {
    match outcome {
        ReadOutcome::NeedMore | ReadOutcome::DroppedInvalid(_) => {}
        ReadOutcome::Fatal(_) => {
            let removed = peers.lock().await.remove(&handle);
            if removed.is_some() {
                handler.on_disconnected(handle);
            }
        }
        ReadOutcome::MessageReady(msg) => {
            deliver_message(handler, peers, transactions, retransmit_notify, anchor, handle, msg).await;
        }
    }
}

async fn deliver_message(
    handler: &Arc<dyn EndpointHandler>,
    peers: &PeerMap,
    transactions: &TransactionTable,
    retransmit_notify: &Notify,
    anchor: SocketHandle,
    handle: SocketHandle,
    msg: BfcpMessage,
) {
    let is_udp = peers.lock().await.get(&handle).map(|p| p.transport == Transport::Udp).unwrap_or(false);

    if is_udp {
        // Match against our own pending requests first (§4.5).
        close_outgoing_transaction(transactions, retransmit_notify, &msg);

        // Duplicate-request dedup via the per-peer answer cache (§4.3, §2.2).
        if let Some(primitive) = msg.primitive() {
            if primitive.starts_transaction() {
                let tid = msg.transaction_id();
                if tid != 0 {
                    let mut peers_guard = peers.lock().await;
                    if let Some(peer) = peers_guard.get_mut(&handle) {
                        if let Some(cached) = peer.answers.get(tid) {
                            let resend = cached.message.clone();
                            let _ = peer.send_data(&resend).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    handler.on_message(handle, msg.clone());

    // A GoodbyeAck we *receive* (as the party that sent Goodbye) means the
    // peer has acknowledged our teardown: the association is done.
    if msg.primitive() == Some(crate::message::Primitive::GoodbyeAck) && handle != anchor {
        let removed = peers.lock().await.remove(&handle);
        if removed.is_some() {
            handler.on_disconnected(handle);
        }
    }
}

async fn sweep_answer_caches(handler: &Arc<dyn EndpointHandler>, peers: &PeerMap) {
    let mut to_remove = Vec::new();
    {
        let mut peers_guard = peers.lock().await;
        for (handle, peer) in peers_guard.iter_mut() {
            if let AnswerExpiry::GoodbyeAckExpired = peer.answers.check_expired() {
                to_remove.push(*handle);
            }
        }
    }
    if to_remove.is_empty() {
        return;
    }
    let mut peers_guard = peers.lock().await;
    for handle in to_remove {
        if peers_guard.remove(&handle).is_some() {
            handler.on_disconnected(handle);
        }
    }
}
