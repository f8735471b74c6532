//! Outstanding-transaction bookkeeping and the T1 retransmission timer.
//!
//! Grounded on `original_source`'s `Transaction::MarkTransmission`/
//! `CheckTimerT1`/`CheckExpiredAnswers` (`BFCPconnection.cpp` lines
//! ~405-479), reexpressed with `std::time::Instant`/`Duration` instead of
//! `timeval` plus a hand-rolled comparator.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::message::BfcpMessage;
use crate::transport::SocketHandle;

const T1_INITIAL: Duration = Duration::from_millis(500);
const T1_CAP: Duration = Duration::from_millis(16_000);
const RETRANSMIT_IDLE_WAKEUP: Duration = Duration::from_secs(30);

/// One in-flight request awaiting an answer, or one answer cached for
/// remote-retransmission handling (`SPEC_FULL.md` §3, §4.3).
#[derive(Clone)]
pub struct Transaction {
    pub socket: SocketHandle,
    /// An owned, deep copy of the serialized message — never shared with
    /// the buffer that produced it (`SPEC_FULL.md` §9).
    pub message: BfcpMessage,
    expiration: Instant,
    duration: Duration,
}

/// Outcome of checking a `Transaction`'s T1 timer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimerOutcome {
    /// Still within its current window; not due yet.
    Alive,
    /// Due for retransmission now, with the duration that just elapsed.
    Fire(Duration),
    /// The T1 schedule has been exhausted; give up on this transaction.
    PermanentlyExpired,
}

impl Transaction {
    pub fn new(socket: SocketHandle, message: BfcpMessage) -> Self {
        Transaction {
            socket,
            message,
            expiration: Instant::now() + T1_INITIAL,
            duration: T1_INITIAL,
        }
    }

    /// Doubles the backoff duration (capped) and resets the expiration
    /// from now, mirroring `Transaction::MarkTransmission`.
    pub fn mark_transmission(&mut self) {
        if self.duration <= T1_CAP {
            self.duration *= 2;
            self.expiration = Instant::now() + self.duration;
        }
    }

    /// Checks this transaction's T1 timer, folding its expiration into
    /// `next_wakeup` when still alive (`Transaction::CheckTimerT1`).
    pub fn check_timer_t1(&self, next_wakeup: &mut Instant) -> TimerOutcome {
        if Instant::now() >= self.expiration {
            // `duration` reaches exactly `T1_CAP` after the 5th
            // retransmission (500ms doubled five times); once that capped
            // window itself elapses, give up rather than firing a 6th
            // retransmission at the cap.
            if self.duration >= T1_CAP {
                return TimerOutcome::PermanentlyExpired;
            }
            return TimerOutcome::Fire(self.duration);
        }
        if self.expiration < *next_wakeup {
            *next_wakeup = self.expiration;
        }
        TimerOutcome::Alive
    }
}

/// Per-peer cache of recently sent answers, keyed by transaction ID,
/// used to respond to remote retransmissions without re-invoking the
/// application (`SPEC_FULL.md` §4.3).
#[derive(Default)]
pub struct AnswerCache {
    entries: HashMap<u16, Transaction>,
}

/// Outcome of sweeping an `AnswerCache` for expired entries.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AnswerExpiry {
    /// Nothing expired.
    None,
    /// A non-`GoodbyeAck` answer expired and was evicted.
    Evicted,
    /// The cached `GoodbyeAck` answer expired: the association is gone.
    GoodbyeAckExpired,
}

impl AnswerCache {
    pub fn insert(&mut self, transaction_id: u16, t: Transaction) {
        if transaction_id != 0 {
            self.entries.insert(transaction_id, t);
        }
    }

    /// Looks up a cached answer by transaction ID, for resending on a
    /// detected remote retransmission (`Client2ServerInfo::HandleRemoteRetrans`).
    pub fn get(&self, transaction_id: u16) -> Option<&Transaction> {
        self.entries.get(&transaction_id)
    }

    /// Sweeps for one expired entry and evicts it, per
    /// `Client2ServerInfo::CheckExpiredAnswers`'s "stop at first expiry"
    /// behavior.
    pub fn check_expired(&mut self) -> AnswerExpiry {
        let mut expired_id = None;
        let mut is_goodbye_ack = false;
        let mut next_wakeup = Instant::now() + RETRANSMIT_IDLE_WAKEUP;
        for (id, t) in self.entries.iter() {
            if let TimerOutcome::Fire(_) | TimerOutcome::PermanentlyExpired =
                t.check_timer_t1(&mut next_wakeup)
            {
                expired_id = Some(*id);
                is_goodbye_ack = t
                    .message
                    .primitive()
                    .map(|p| p == crate::message::Primitive::GoodbyeAck)
                    .unwrap_or(false);
                break;
            }
        }
        match expired_id {
            Some(id) if is_goodbye_ack => {
                // The server deliberately keeps the peer alive after
                // answering Goodbye so a retransmitted Goodbye can be
                // re-answered; once T1 elapses, the association is
                // really gone (SPEC_FULL.md §4.3).
                self.entries.remove(&id);
                AnswerExpiry::GoodbyeAckExpired
            }
            Some(id) => {
                self.entries.remove(&id);
                AnswerExpiry::Evicted
            }
            None => AnswerExpiry::None,
        }
    }
}

/// A retransmission queued by the sweep in `retransmit::run_once`.
pub struct DueRetransmission {
    pub transaction_id: u16,
    pub socket: SocketHandle,
    pub message: BfcpMessage,
}

/// Outcome of sweeping the outbound transaction table.
pub struct SweepOutcome {
    pub due: Vec<DueRetransmission>,
    pub permanently_expired: Option<(u16, SocketHandle)>,
    pub next_wakeup: Instant,
}

/// The outbound transaction map plus the per-peer answer caches
/// (`SPEC_FULL.md` §4.3). Guarded by a synchronous lock, awaited through
/// the endpoint's outer async lock (see `endpoint::mod` grounding notes
/// in `DESIGN.md`).
#[derive(Default)]
pub struct TransactionTable {
    outbound: Mutex<HashMap<u16, Transaction>>,
}

impl TransactionTable {
    /// Inserts a new outbound transaction, if `transaction_id != 0`
    /// (`SPEC_FULL.md` §3 invariant 2).
    pub fn insert(&self, transaction_id: u16, t: Transaction) {
        if transaction_id != 0 {
            self.outbound.lock().insert(transaction_id, t);
        }
    }

    /// Erases the outbound transaction matching `transaction_id`, if any.
    /// Returns whether an entry was removed.
    pub fn close(&self, transaction_id: u16) -> bool {
        self.outbound.lock().remove(&transaction_id).is_some()
    }

    pub fn contains(&self, transaction_id: u16) -> bool {
        self.outbound.lock().contains_key(&transaction_id)
    }

    pub fn len(&self) -> usize {
        self.outbound.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One sweep of the outbound table, mirroring
    /// `BFCPConnection::ManageRetransmission`'s per-iteration walk
    /// (`SPEC_FULL.md` §4.6): folds alive expirations into the next
    /// wakeup, collects due retransmissions (advancing their timers),
    /// and stops at the first permanent expiry (the map is about to be
    /// mutated, so the walk can't safely continue past it).
    pub fn sweep(&self) -> SweepOutcome {
        let mut table = self.outbound.lock();
        let mut next_wakeup = Instant::now() + RETRANSMIT_IDLE_WAKEUP;
        let mut due = Vec::new();
        let mut permanently_expired = None;

        let ids: Vec<u16> = table.keys().copied().collect();
        for id in ids {
            let outcome = {
                let t = table.get(&id).expect("id came from this table's own keys");
                t.check_timer_t1(&mut next_wakeup)
            };
            match outcome {
                TimerOutcome::Alive => {}
                TimerOutcome::Fire(_) => {
                    let t = table.get_mut(&id).expect("checked above");
                    t.mark_transmission();
                    due.push(DueRetransmission {
                        transaction_id: id,
                        socket: t.socket,
                        message: t.message.clone(),
                    });
                }
                TimerOutcome::PermanentlyExpired => {
                    let t = table.get(&id).expect("checked above");
                    permanently_expired = Some((id, t.socket));
                    break;
                }
            }
        }

        SweepOutcome { due, permanently_expired, next_wakeup }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Header, Primitive};

    fn msg(primitive: Primitive, tid: u16) -> BfcpMessage {
        BfcpMessage::new(Header::new(primitive, tid), &[])
    }

    #[test]
    fn insert_rejects_zero_transaction_id() {
        let table = TransactionTable::default();
        table.insert(0, Transaction::new(SocketHandle::next(), msg(Primitive::Hello, 0)));
        assert!(table.is_empty());
    }

    #[test]
    fn close_removes_matching_entry_only() {
        let table = TransactionTable::default();
        let sock = SocketHandle::next();
        table.insert(1, Transaction::new(sock, msg(Primitive::Hello, 1)));
        table.insert(2, Transaction::new(sock, msg(Primitive::Hello, 2)));
        assert!(table.close(1));
        assert_eq!(table.len(), 1);
        assert!(table.contains(2));
    }

    #[test]
    fn fresh_transaction_is_not_immediately_due() {
        let t = Transaction::new(SocketHandle::next(), msg(Primitive::Hello, 7));
        let mut wakeup = Instant::now() + Duration::from_secs(60);
        assert_eq!(t.check_timer_t1(&mut wakeup), TimerOutcome::Alive);
    }

    #[test]
    fn backoff_doubles_until_cap_then_expires() {
        let mut t = Transaction::new(SocketHandle::next(), msg(Primitive::Hello, 7));
        let expected_ms = [1000u64, 2000, 4000, 8000, 16000];
        for &e in &expected_ms {
            t.mark_transmission();
            assert_eq!(t.duration, Duration::from_millis(e));
        }
        // Duration is now exactly at the cap; once that capped window
        // elapses, the transaction gives up rather than firing a 6th
        // retransmission. Force elapse without a real 16s wait.
        t.expiration = Instant::now() - Duration::from_millis(1);
        let mut wakeup = Instant::now() + Duration::from_secs(60);
        assert_eq!(t.check_timer_t1(&mut wakeup), TimerOutcome::PermanentlyExpired);
    }

    #[test]
    fn at_cap_duration_waits_out_its_window_before_expiring() {
        let mut t = Transaction::new(SocketHandle::next(), msg(Primitive::Hello, 7));
        for _ in 0..5 {
            t.mark_transmission();
        }
        assert_eq!(t.duration, T1_CAP);
        // The capped window hasn't elapsed yet: still alive, not expired.
        let mut wakeup = Instant::now() + Duration::from_secs(60);
        assert_eq!(t.check_timer_t1(&mut wakeup), TimerOutcome::Alive);
    }

    #[test]
    fn answer_cache_keeps_goodbye_ack_distinct_from_plain_eviction() {
        let mut cache = AnswerCache::default();
        let mut t = Transaction::new(SocketHandle::next(), msg(Primitive::GoodbyeAck, 5));
        // force immediate expiry for the test
        t.duration = T1_CAP + Duration::from_millis(1);
        cache.insert(5, t);
        assert_eq!(cache.check_expired(), AnswerExpiry::GoodbyeAckExpired);
        assert!(cache.get(5).is_none());
    }
}
