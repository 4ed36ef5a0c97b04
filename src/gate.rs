use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Where the feedback endpoint stands.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u8)]
pub enum TxState {
    /// No stream; nothing may be submitted.
    Disarmed = 0,
    /// Streaming, no transfer outstanding.
    Ready = 1,
    /// One feedback packet has been handed to the endpoint.
    InFlight = 2,
}

impl TxState {
    fn from_raw(raw: u8) -> TxState {
        match raw {
            1 => TxState::Ready,
            2 => TxState::InFlight,
            _ => TxState::Disarmed,
        }
    }
}

/// Decides when a feedback packet may go out.
///
/// The tick handler submits and the IN completion handlers retire, so the
/// state is a single atomic and every transition is a compare-exchange from
/// the one state it is allowed to leave. A packet is only submitted on frames
/// whose parity matches the one recorded at the last incomplete transfer,
/// which halves the feedback rate and lines it up with the frames the host
/// actually polls.
pub struct TransmissionGate {
    state: AtomicU8,
    parity: AtomicU8,
    sent: AtomicU32,
    aborted: AtomicU32,
}

impl TransmissionGate {
    pub const fn new() -> Self {
        TransmissionGate {
            state: AtomicU8::new(TxState::Disarmed as u8),
            parity: AtomicU8::new(0),
            sent: AtomicU32::new(0),
            aborted: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> TxState {
        TxState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn in_flight(&self) -> bool {
        self.state() == TxState::InFlight
    }

    /// Opens the gate for a fresh stream. A transfer left over from a
    /// previous stream is forgotten.
    pub fn arm(&self) {
        self.state.store(TxState::Ready as u8, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.state.store(TxState::Disarmed as u8, Ordering::Release);
    }

    /// Claims the endpoint for one packet. Returns `true` if the caller must
    /// now transmit.
    pub fn try_submit(&self, frame_number: u16) -> bool {
        if (frame_number & 1) as u8 != self.parity.load(Ordering::Acquire) {
            return false;
        }
        let claimed = self
            .state
            .compare_exchange(
                TxState::Ready as u8,
                TxState::InFlight as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if claimed {
            self.sent.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    /// The host picked up the packet.
    pub fn complete(&self) -> bool {
        self.retire()
    }

    /// The endpoint refused the packet we claimed it for.
    pub fn abort(&self) -> bool {
        self.retire()
    }

    /// The host did not poll the endpoint in the frame we queued for.
    /// Returns `true` when a transfer was outstanding and the endpoint FIFO
    /// must be flushed.
    pub fn incomplete(&self, frame_number: u16) -> bool {
        self.parity
            .store((frame_number & 1) as u8, Ordering::Release);
        let flushed = self.retire();
        if flushed {
            self.aborted.fetch_add(1, Ordering::Relaxed);
        }
        flushed
    }

    pub fn sent(&self) -> u32 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn aborted(&self) -> u32 {
        self.aborted.load(Ordering::Relaxed)
    }

    fn retire(&self) -> bool {
        self.state
            .compare_exchange(
                TxState::InFlight as u8,
                TxState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for TransmissionGate {
    fn default() -> Self {
        TransmissionGate::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disarmed_never_submits() {
        let gate = TransmissionGate::new();
        assert!(!gate.try_submit(0));
        assert!(!gate.try_submit(1));
        assert_eq!(gate.state(), TxState::Disarmed);
    }

    #[test]
    fn one_packet_in_flight() {
        let gate = TransmissionGate::new();
        gate.arm();
        assert!(gate.try_submit(0));
        assert!(gate.in_flight());
        for frame in 0..10 {
            assert!(!gate.try_submit(frame));
        }
        assert!(gate.complete());
        assert!(!gate.in_flight());
        assert_eq!(gate.sent(), 1);
    }

    #[test]
    fn only_on_matching_parity() {
        let gate = TransmissionGate::new();
        gate.arm();
        assert!(!gate.try_submit(3));
        assert!(gate.try_submit(4));
        gate.complete();
        assert!(!gate.try_submit(5));
        assert!(gate.try_submit(6));
    }

    #[test]
    fn incomplete_moves_parity_and_frees_endpoint() {
        let gate = TransmissionGate::new();
        gate.arm();
        assert!(gate.try_submit(8));
        assert!(gate.incomplete(9));
        assert!(!gate.in_flight());
        assert_eq!(gate.aborted(), 1);
        assert!(!gate.try_submit(10));
        assert!(gate.try_submit(11));
    }

    #[test]
    fn completions_without_submission_are_ignored() {
        let gate = TransmissionGate::new();
        gate.arm();
        assert!(!gate.complete());
        assert!(!gate.incomplete(0));
        assert!(!gate.abort());
        assert_eq!(gate.state(), TxState::Ready);
        assert_eq!(gate.aborted(), 0);
    }

    #[test]
    fn rearm_forgets_stale_transfer() {
        let gate = TransmissionGate::new();
        gate.arm();
        assert!(gate.try_submit(0));
        gate.disarm();
        assert!(!gate.in_flight());
        assert!(!gate.complete());
        gate.arm();
        assert!(gate.try_submit(2));
    }
}
