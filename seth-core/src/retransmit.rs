//! Retransmission bookkeeping for unacknowledged sends. Time is passed in by
//! the caller so the schedule can be exercised without sleeping in tests.

use std::time::{Duration, Instant};

use crate::identity::PeerId;

/// One outstanding unicast packet awaiting an ACK. The `(peer, packet_id)`
/// pair identifies it; the packet id is reused for every resend so a single
/// ACK from the remote side clears it no matter which copy arrived.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub peer: PeerId,
    pub packet_id: u16,
    pub payload: Vec<u8>,
    retry_index: usize,
    next_deadline: Instant,
}

/// Result of advancing a pending send past one backoff tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Rescheduled onto the next tier.
    Rescheduled,
    /// All tiers spent; the send has been removed and delivery failed.
    Exhausted,
}

/// Tracks pending sends against a fixed backoff schedule.
#[derive(Debug)]
pub struct RetransmitQueue {
    schedule: Vec<Duration>,
    pending: Vec<PendingSend>,
}

impl RetransmitQueue {
    pub fn new(schedule: Vec<Duration>) -> Self {
        debug_assert!(!schedule.is_empty());
        Self {
            schedule,
            pending: Vec::new(),
        }
    }

    /// Start tracking a freshly sent packet.
    pub fn track(&mut self, peer: PeerId, packet_id: u16, payload: Vec<u8>, now: Instant) {
        let next_deadline = now + self.schedule[0];
        self.pending.push(PendingSend {
            peer,
            packet_id,
            payload,
            retry_index: 0,
            next_deadline,
        });
    }

    /// Clear the matching pending send. Returns whether anything matched;
    /// unmatched ACKs are not an error (the peer may re-ACK a cleared send).
    pub fn acknowledge(&mut self, peer: &PeerId, packet_id: u16) -> bool {
        let before = self.pending.len();
        self.pending
            .retain(|p| !(p.packet_id == packet_id && &p.peer == peer));
        self.pending.len() != before
    }

    /// Every pending send whose deadline has passed, as (peer, packet id,
    /// payload) ready to be put back on the wire.
    pub fn due_for_retry(&self, now: Instant) -> Vec<(PeerId, u16, Vec<u8>)> {
        self.pending
            .iter()
            .filter(|p| p.next_deadline <= now)
            .map(|p| (p.peer.clone(), p.packet_id, p.payload.clone()))
            .collect()
    }

    /// Move a send to its next backoff tier after a resend. Past the last
    /// tier the send is dropped and `Exhausted` is returned; the caller
    /// reports the failure exactly once.
    pub fn advance(&mut self, peer: &PeerId, packet_id: u16, now: Instant) -> RetryOutcome {
        let Some(idx) = self
            .pending
            .iter()
            .position(|p| p.packet_id == packet_id && &p.peer == peer)
        else {
            return RetryOutcome::Rescheduled;
        };
        let send = &mut self.pending[idx];
        send.retry_index += 1;
        if send.retry_index >= self.schedule.len() {
            self.pending.remove(idx);
            RetryOutcome::Exhausted
        } else {
            send.next_deadline = now + self.schedule[send.retry_index];
            RetryOutcome::Rescheduled
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Vec<Duration> {
        vec![
            Duration::from_millis(10),
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(10),
        ]
    }

    fn peer(n: u16) -> PeerId {
        PeerId::derive("10.0.0.1", n)
    }

    #[test]
    fn ack_clears_pending_permanently() {
        let mut q = RetransmitQueue::new(schedule());
        let now = Instant::now();
        q.track(peer(1), 7, b"hi".to_vec(), now);
        assert!(q.acknowledge(&peer(1), 7));
        assert!(q.is_empty());
        // Never due again, at any future time.
        assert!(q.due_for_retry(now + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn unmatched_ack_is_ignored() {
        let mut q = RetransmitQueue::new(schedule());
        let now = Instant::now();
        q.track(peer(1), 7, b"hi".to_vec(), now);
        assert!(!q.acknowledge(&peer(1), 8));
        assert!(!q.acknowledge(&peer(2), 7));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn not_due_before_first_deadline() {
        let mut q = RetransmitQueue::new(schedule());
        let now = Instant::now();
        q.track(peer(1), 7, b"hi".to_vec(), now);
        assert!(q.due_for_retry(now).is_empty());
        assert!(q
            .due_for_retry(now + Duration::from_millis(9))
            .is_empty());
        assert_eq!(q.due_for_retry(now + Duration::from_millis(10)).len(), 1);
    }

    #[test]
    fn exhaustion_after_one_resend_per_tier() {
        let mut q = RetransmitQueue::new(schedule());
        let mut now = Instant::now();
        q.track(peer(1), 7, b"hi".to_vec(), now);

        let mut resends = 0;
        let mut exhausted = false;
        for _ in 0..schedule().len() {
            now += Duration::from_secs(20); // past any tier
            let due = q.due_for_retry(now);
            assert_eq!(due.len(), 1);
            let (p, id, payload) = due.into_iter().next().unwrap();
            assert_eq!(payload, b"hi");
            resends += 1;
            if q.advance(&p, id, now) == RetryOutcome::Exhausted {
                exhausted = true;
                break;
            }
        }
        assert_eq!(resends, 4);
        assert!(exhausted);
        assert!(q.is_empty());
        assert!(q.due_for_retry(now + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn advance_reschedules_onto_next_tier() {
        let mut q = RetransmitQueue::new(schedule());
        let now = Instant::now();
        q.track(peer(1), 7, b"hi".to_vec(), now);

        let t1 = now + Duration::from_millis(10);
        assert_eq!(q.advance(&peer(1), 7, t1), RetryOutcome::Rescheduled);
        // Next tier is 100ms from the advance time.
        assert!(q.due_for_retry(t1 + Duration::from_millis(99)).is_empty());
        assert_eq!(q.due_for_retry(t1 + Duration::from_millis(100)).len(), 1);
    }

    #[test]
    fn advance_on_unknown_send_is_a_noop() {
        let mut q = RetransmitQueue::new(schedule());
        assert_eq!(
            q.advance(&peer(1), 7, Instant::now()),
            RetryOutcome::Rescheduled
        );
        assert!(q.is_empty());
    }

    #[test]
    fn sends_to_different_peers_tracked_independently() {
        let mut q = RetransmitQueue::new(schedule());
        let now = Instant::now();
        q.track(peer(1), 0, b"a".to_vec(), now);
        q.track(peer(2), 0, b"b".to_vec(), now);
        assert!(q.acknowledge(&peer(1), 0));
        assert_eq!(q.len(), 1);
        let due = q.due_for_retry(now + Duration::from_secs(1));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, peer(2));
    }
}
