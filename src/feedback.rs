//! Explicit feedback: turning buffer fill into a rate the host can follow.
//!
//! The device has no way to measure its own playback clock against the host's
//! frames, so the reported rate starts at the nominal value and is nudged in
//! proportion to how far the free space in the ring sits from the operating
//! point. The correction is proportional only and hard-clamped to
//! `nominal ± bound`; a runaway value is worse than a slow one.
//!
//! Rates are kept in a `u32` holding the 10.14 feedback value shifted left by
//! eight bits, so `48 << 22` is 48 kHz. The top three bytes are what goes on
//! the wire, least significant first:
//!
//! ```text
//! 48.000 kHz => 0x0C000000 => packet { 0x00, 0x00, 0x0C }
//! ```

use core::sync::atomic::{AtomicU32, Ordering};
use modular_bitfield::prelude::*;

use crate::config::{Config, FEEDBACK_PACKET_SIZE, FEEDBACK_UNITY, FEEDBACK_UNITY_SHIFT};
use crate::gate::TransmissionGate;

#[bitfield]
struct FeedbackWord {
    #[skip]
    __: B8,
    fraction: B14,
    integer: B10,
}

/// Nominal feedback value for a sample rate in Hz.
pub const fn nominal_for_rate(sample_rate: u32) -> u32 {
    (((sample_rate as u64) << FEEDBACK_UNITY_SHIFT) / 1000) as u32
}

/// Packs a feedback value into its 3-byte wire form. The low eight bits are
/// below the wire resolution and are dropped.
pub fn encode(value: u32) -> [u8; FEEDBACK_PACKET_SIZE] {
    let bytes = FeedbackWord::new()
        .with_integer(((value >> 22) & 0x3ff) as u16)
        .with_fraction(((value >> 8) & 0x3fff) as u16)
        .into_bytes();
    [bytes[1], bytes[2], bytes[3]]
}

pub fn decode(packet: [u8; FEEDBACK_PACKET_SIZE]) -> u32 {
    let word = FeedbackWord::from_bytes([0, packet[0], packet[1], packet[2]]);
    ((word.integer() as u32) << 22) | ((word.fraction() as u32) << 8)
}

/// One step of the proportional controller.
///
/// `deviation` is free slots minus the operating point; a positive deviation
/// means the buffer is draining and the host should send faster.
pub fn correct(nominal: u32, bound: u32, gain: i64, deviation: i64) -> u32 {
    let ratio = FEEDBACK_UNITY.saturating_add(deviation.saturating_mul(gain));
    let raw = (nominal as i64).saturating_mul(ratio) >> FEEDBACK_UNITY_SHIFT;
    let lo = nominal.saturating_sub(bound) as i64;
    let hi = nominal.saturating_add(bound) as i64;
    raw.max(lo).min(hi) as u32
}

/// Feedback state shared by the tick handler and the feedback endpoint
/// handlers. It outlives any one stream, so it is usually a `static`.
pub struct FeedbackState {
    config: Config,
    nominal: u32,
    bound: u32,
    gain: i64,
    target_free: usize,
    interval: u32,
    current: AtomicU32,
    ticks: AtomicU32,
    gate: TransmissionGate,
}

impl FeedbackState {
    pub const fn new(config: Config) -> Self {
        let nominal = nominal_for_rate(config.sample_rate);
        FeedbackState {
            config,
            nominal,
            bound: config.bound,
            gain: config.gain,
            target_free: match config.capacity.checked_div(2 * config.target_divisor) {
                Some(target) => target,
                None => 0,
            },
            interval: config.update_interval,
            current: AtomicU32::new(nominal),
            ticks: AtomicU32::new(0),
            gate: TransmissionGate::new(),
        }
    }

    /// The parameters the controller was built with. A stream must be run
    /// with the same ones, or the operating point is not its own.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn nominal(&self) -> u32 {
        self.nominal
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }

    /// The value carried by the next feedback packet.
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    pub fn gate(&self) -> &TransmissionGate {
        &self.gate
    }

    pub fn in_flight(&self) -> bool {
        self.gate.in_flight()
    }

    /// Feeds one tick's fill reading to the controller. Only every
    /// `update_interval`-th call recomputes the value; the clamped result
    /// replaces the stored one.
    pub fn update(&self, free_slots: usize) -> u32 {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if self.interval > 1 && tick % self.interval != 0 {
            return self.current();
        }
        let deviation = free_slots as i64 - self.target_free as i64;
        let value = correct(self.nominal, self.bound, self.gain, deviation);
        self.current.store(value, Ordering::Release);
        log::trace!("feedback: free={} dev={} fb=0x{:08x}", free_slots, deviation, value);
        value
    }

    pub fn packet(&self) -> [u8; FEEDBACK_PACKET_SIZE] {
        encode(self.current())
    }

    /// Back to nominal with the gate open, for a stream that is starting.
    pub fn start(&self) {
        self.rewind();
        self.gate.arm();
    }

    /// Back to nominal with the gate shut. Any transfer still on the endpoint
    /// belongs to a stream that no longer exists.
    pub fn stop(&self) {
        self.rewind();
        self.gate.disarm();
    }

    fn rewind(&self) {
        self.current.store(self.nominal, Ordering::Release);
        self.ticks.store(0, Ordering::Relaxed);
    }
}
