//! Build-time stream parameters.
//!
//! Everything here is fixed when the firmware is built; nothing is negotiated
//! with the host. The controller constants in particular are tuned together:
//! changing one changes the stability of the feedback loop.

use crate::error::{Error, Result};

/// Sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channels per frame.
pub const CHANNELS: u8 = 2;

/// Bytes per sample frame: two channels of 16-bit PCM.
pub const FRAME_SIZE: usize = 4;

/// Bytes the host sends per 1 ms frame at the nominal rate.
pub const NOMINAL_PACKET_SIZE: usize = (SAMPLE_RATE as usize / 1000) * FRAME_SIZE;

/// Largest OUT packet accepted. One extra frame leaves room for the host to
/// speed up when feedback asks it to.
pub const OUT_PACKET_SIZE: usize = NOMINAL_PACKET_SIZE + FRAME_SIZE;

/// Largest full-speed isochronous payload.
pub const MAX_ISO_PACKET: usize = 1023;

/// Feedback packets carry a 3-byte 10.14 value.
pub const FEEDBACK_PACKET_SIZE: usize = 3;

/// Ring buffer capacity in bytes (32 ms of audio).
pub const TOTAL_BUF_SIZE: usize = NOMINAL_PACKET_SIZE * 32;

/// Volume handed to the sink when it is initialized.
pub const DEFAULT_VOLUME: u8 = 70;

/// Feature unit that owns the mute control.
pub const MUTE_UNIT_ID: u8 = 0x02;

/// Change of the correction ratio per slot of fill deviation, in units of
/// `1 / FEEDBACK_UNITY`.
pub const FEEDBACK_GAIN: i64 = 256;

/// Full-scale unit of the correction ratio, as a shift.
pub const FEEDBACK_UNITY_SHIFT: u32 = 22;

/// Full-scale unit of the correction ratio.
pub const FEEDBACK_UNITY: i64 = 1 << FEEDBACK_UNITY_SHIFT;

/// Largest allowed distance between the reported and the nominal rate.
/// In the feedback format `1 << 22` is 1 kHz.
pub const FEEDBACK_BOUND: u32 = 1 << 22;

/// The operating point is `capacity / (2 * TARGET_DIVISOR)` free slots.
pub const TARGET_DIVISOR: usize = 6;

/// Ticks between controller corrections.
pub const UPDATE_INTERVAL: u32 = 1;

/// Runtime copy of the build-time parameters.
///
/// The engine only ever reads the constants through this struct, which lets
/// tests run it with a small buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub sample_rate: u32,
    pub capacity: usize,
    pub max_packet_size: usize,
    pub gain: i64,
    pub bound: u32,
    pub target_divisor: usize,
    pub update_interval: u32,
}

impl Config {
    pub const DEFAULT: Config = Config {
        sample_rate: SAMPLE_RATE,
        capacity: TOTAL_BUF_SIZE,
        max_packet_size: OUT_PACKET_SIZE,
        gain: FEEDBACK_GAIN,
        bound: FEEDBACK_BOUND,
        target_divisor: TARGET_DIVISOR,
        update_interval: UPDATE_INTERVAL,
    };

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn with_gain(mut self, gain: i64) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_bound(mut self, bound: u32) -> Self {
        self.bound = bound;
        self
    }

    pub fn with_update_interval(mut self, ticks: u32) -> Self {
        self.update_interval = ticks;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0
            || self.capacity % FRAME_SIZE != 0
            || self.max_packet_size == 0
            || self.max_packet_size > MAX_ISO_PACKET
            || self.target_divisor == 0
            || self.update_interval == 0
        {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// Bytes that must be queued before playback starts.
    pub fn priming_threshold(&self) -> usize {
        self.capacity / 2
    }

    /// Free slots at the controller's operating point.
    pub fn target_free(&self) -> usize {
        self.capacity / (2 * self.target_divisor)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::DEFAULT
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_sizes() {
        assert_eq!(NOMINAL_PACKET_SIZE, 192);
        assert_eq!(OUT_PACKET_SIZE, 196);
        assert_eq!(TOTAL_BUF_SIZE % FRAME_SIZE, 0);
        assert!(Config::DEFAULT.validate().is_ok());
        assert_eq!(Config::DEFAULT.priming_threshold(), TOTAL_BUF_SIZE / 2);
    }

    #[test]
    fn rejects_bad_capacity() {
        assert_eq!(
            Config::DEFAULT.with_capacity(0).validate(),
            Err(Error::InvalidConfig)
        );
        assert_eq!(
            Config::DEFAULT.with_capacity(4098).validate(),
            Err(Error::InvalidConfig)
        );
        assert_eq!(
            Config::DEFAULT.with_update_interval(0).validate(),
            Err(Error::InvalidConfig)
        );
    }

    #[test]
    fn rejects_packets_above_iso_limit() {
        assert!(Config::DEFAULT.with_max_packet_size(1023).validate().is_ok());
        assert_eq!(
            Config::DEFAULT.with_max_packet_size(1024).validate(),
            Err(Error::InvalidConfig)
        );
        assert_eq!(
            Config::DEFAULT.with_max_packet_size(65_536 + 196).validate(),
            Err(Error::InvalidConfig)
        );
    }

    #[test]
    fn target_is_a_sixth_of_half() {
        let config = Config::DEFAULT.with_capacity(4096);
        assert_eq!(config.target_free(), 341);
    }
}
