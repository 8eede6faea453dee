//! Per-sender packet deduplication.
//!
//! Every upstream sender numbers its packets. A [`SenderSlot`] remembers which of those
//! numbers were accepted and which completed, so a packet delivered twice is applied at most
//! once, and bounds how far ahead of its last contiguously completed packet a sender may run.

use std::collections::BTreeSet;

use load_types::Status;
use parking_lot::Mutex;

/// Outcome of offering a packet to a [`SenderSlot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Admission {
    /// First delivery: the caller owns the packet and must eventually call
    /// [`SenderSlot::complete`] or [`SenderSlot::forget`].
    Accepted,
    /// The packet already completed. Answer OK without applying it again.
    Replay,
    /// Answer with this status without applying the packet.
    Rejected(Status),
}

#[derive(Debug)]
struct SlidingWindow {
    /// Accepted packets, in flight or completed.
    receive: BTreeSet<i64>,
    /// Completed packets. Always a subset of `receive`.
    success: BTreeSet<i64>,
    /// Every packet up to and including this one completed and was pruned.
    last_contiguous_seq: i64,
    /// Set by the sender's first eos packet.
    closed: bool,
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self {
            receive: BTreeSet::new(),
            success: BTreeSet::new(),
            last_contiguous_seq: -1,
            closed: false,
        }
    }
}

impl SlidingWindow {
    fn admit(&mut self, seq: i64, eos: bool, window_size: usize) -> Admission {
        if self.receive.contains(&seq) {
            if !self.success.contains(&seq) || eos {
                return Admission::Rejected(Status::duplicate_rpc_invocation(format!(
                    "packet_seq {seq} in add chunk request already process"
                )));
            }
            return Admission::Replay;
        }

        if seq <= self.last_contiguous_seq {
            return Admission::Replay;
        }

        if seq > self.last_contiguous_seq.saturating_add(window_size as i64) {
            return Admission::Rejected(Status::invalid_argument(format!(
                "packet_seq {seq} in add chunk request forward last success packet_seq {} too much",
                self.last_contiguous_seq
            )));
        }

        self.receive.insert(seq);
        Admission::Accepted
    }

    fn complete(&mut self, seq: i64, window_size: usize) {
        debug_assert!(self.receive.contains(&seq));
        self.success.insert(seq);

        // Keep half a window of completed packets around so recent retries are answered from
        // the window, and only slide past the contiguous head.
        while self.success.len() > window_size / 2 {
            let (Some(&success_head), Some(&receive_head)) =
                (self.success.first(), self.receive.first())
            else {
                break;
            };
            if success_head != receive_head || success_head != self.last_contiguous_seq + 1 {
                break;
            }
            self.success.pop_first();
            self.receive.pop_first();
            self.last_contiguous_seq += 1;
        }
    }
}

/// The deduplication state of one upstream sender.
#[derive(Debug, Default)]
pub(crate) struct SenderSlot {
    window: Mutex<SlidingWindow>,
}

impl SenderSlot {
    /// Offer packet `seq` of this sender.
    pub(crate) fn admit(&self, seq: i64, eos: bool, window_size: usize) -> Admission {
        self.window.lock().admit(seq, eos, window_size)
    }

    /// Record that the accepted packet `seq` completed and slide the window.
    pub(crate) fn complete(&self, seq: i64, window_size: usize) {
        self.window.lock().complete(seq, window_size)
    }

    /// Drop the accepted packet `seq` without completing it, so a later delivery of the same
    /// packet is admitted again.
    pub(crate) fn forget(&self, seq: i64) {
        let mut window = self.window.lock();
        debug_assert!(!window.success.contains(&seq));
        window.receive.remove(&seq);
    }

    /// Mark this sender closed. Returns `true` only for the first call.
    pub(crate) fn close(&self) -> bool {
        let mut window = self.window.lock();
        !std::mem::replace(&mut window.closed, true)
    }

    #[cfg(test)]
    fn last_contiguous_seq(&self) -> i64 {
        self.window.lock().last_contiguous_seq
    }

    #[cfg(test)]
    fn window_len(&self) -> (usize, usize) {
        let window = self.window.lock();
        (window.receive.len(), window.success.len())
    }
}
