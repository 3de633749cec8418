//! In-flight ledger
//!
//! Tracks inbound messages by message ID from admission until they were
//! processed, then keeps the ID for a short ignore period so a redelivery of
//! the same message is recognised as duplicate. Eviction deadlines sit in an
//! ordered map drained on every access.
//!
//! Capacity applies to bounded admissions (requests and one-way messages)
//! only and counts those not yet processed. Every other message is tracked
//! for duplicates and acknowledgement but never rejected for capacity.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Transport acknowledgement handle of one inbound publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckHandle {
    pub transport_message_id: u32,
    pub qos: u8,
}

#[derive(Debug)]
struct LedgerEntry {
    ack: AckHandle,
    /// Observer allowed an immediate acknowledgement at admission
    ack_allowed: bool,
    /// Counts toward the capacity bound
    bounded: bool,
    processed: bool,
}

/// Result of offering a message to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Capacity reached; the message must be dropped unacknowledged
    Full,
    /// Same message ID already tracked
    Duplicate,
}

/// What to do once a message was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub ack: AckHandle,
    pub ack_allowed: bool,
}

#[derive(Debug)]
pub struct InFlightLedger {
    max_in_flight: usize,
    ignore_period: Duration,
    entries: HashMap<String, LedgerEntry>,
    evictions: BTreeMap<(Instant, u64), String>,
    next_seq: u64,
    /// Bounded entries not yet processed
    bounded_in_flight: usize,
    /// Acknowledgements deferred by backpressure
    outstanding: Vec<AckHandle>,
}

impl InFlightLedger {
    /// `max_in_flight == 0` disables the capacity bound
    pub fn new(max_in_flight: usize, ignore_period: Duration) -> Self {
        Self {
            max_in_flight,
            ignore_period,
            entries: HashMap::new(),
            evictions: BTreeMap::new(),
            next_seq: 0,
            bounded_in_flight: 0,
            outstanding: Vec::new(),
        }
    }

    /// Remove entries whose ignore period elapsed
    pub fn drain_expired(&mut self, now: Instant) {
        while let Some(entry) = self.evictions.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let message_id = entry.remove();
            self.entries.remove(&message_id);
        }
    }

    /// Offer a message; only `bounded` messages can be rejected as `Full`
    pub fn admit(
        &mut self,
        message_id: &str,
        ack: AckHandle,
        bounded: bool,
        now: Instant,
    ) -> Admission {
        self.drain_expired(now);
        if bounded && self.max_in_flight > 0 && self.bounded_in_flight >= self.max_in_flight {
            return Admission::Full;
        }
        if self.entries.contains_key(message_id) {
            return Admission::Duplicate;
        }
        self.entries.insert(
            message_id.to_string(),
            LedgerEntry {
                ack,
                ack_allowed: true,
                bounded,
                processed: false,
            },
        );
        if bounded {
            self.bounded_in_flight += 1;
        }
        Admission::Accepted
    }

    /// Record the observer's admission decision
    pub fn set_ack_allowed(&mut self, message_id: &str, allowed: bool) {
        if let Some(entry) = self.entries.get_mut(message_id) {
            entry.ack_allowed = allowed;
        }
    }

    /// Mark a message processed and schedule its eviction
    ///
    /// `None` for unknown or already processed IDs.
    pub fn complete(&mut self, message_id: &str, now: Instant) -> Option<Completion> {
        self.drain_expired(now);
        let entry = self.entries.get_mut(message_id)?;
        if entry.processed {
            return None;
        }
        entry.processed = true;
        if entry.bounded {
            self.bounded_in_flight -= 1;
        }
        let completion = Completion {
            ack: entry.ack,
            ack_allowed: entry.ack_allowed,
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.evictions
            .insert((now + self.ignore_period, seq), message_id.to_string());
        Some(completion)
    }

    /// Forget a message that could not be routed
    pub fn forget(&mut self, message_id: &str) -> Option<AckHandle> {
        let entry = self.entries.remove(message_id)?;
        if entry.processed {
            self.evictions.retain(|_, id| id != message_id);
        } else if entry.bounded {
            self.bounded_in_flight -= 1;
        }
        Some(entry.ack)
    }

    pub fn defer(&mut self, ack: AckHandle) {
        self.outstanding.push(ack);
    }

    /// Take every deferred acknowledgement
    pub fn take_outstanding(&mut self) -> Vec<AckHandle> {
        std::mem::take(&mut self.outstanding)
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    /// Tracked IDs, including processed ones awaiting eviction
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_eviction(&self) -> usize {
        self.evictions.len()
    }

    /// Admitted messages not yet processed
    pub fn in_flight(&self) -> usize {
        self.entries.len() - self.evictions.len()
    }

    /// Unprocessed admissions counted against the capacity bound
    pub fn bounded_in_flight(&self) -> usize {
        self.bounded_in_flight
    }
}
