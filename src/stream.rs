use crate::config::{Config, CHANNELS, DEFAULT_VOLUME, FEEDBACK_PACKET_SIZE, FRAME_SIZE, MUTE_UNIT_ID};
use crate::control::{ControlRequest, PendingControl, RequestKind};
use crate::error::{Error, Result};
use crate::feedback::FeedbackState;
use crate::ring::RingBuffer;
use crate::sink::AudioSink;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum StreamPhase {
    /// Zero-bandwidth setting, or torn down.
    Idle,
    /// Samples are arriving but the sink has not been started.
    Priming,
    /// The sink is consuming the ring and feedback is running.
    Active,
}

/// Things that went wrong without stopping the stream.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct StreamStats {
    pub received_bytes: u32,
    pub dropped_packets: u32,
    pub truncated_bytes: u32,
    pub overruns: u32,
    pub out_incomplete: u32,
}

/// One playback stream: the ring, the sink that drains it, and the phase that
/// decides who may touch what.
///
/// `receive` is the producer and must only be called from the OUT endpoint
/// handler. `tick` must only be called from the start-of-frame handler.
pub struct AudioStream<S: AudioSink> {
    config: Config,
    ring: RingBuffer,
    phase: StreamPhase,
    primed: usize,
    pending: Option<PendingControl>,
    muted: bool,
    sink: S,
    stats: StreamStats,
}

impl<S: AudioSink> AudioStream<S> {
    pub fn new(sink: S, config: Config) -> Result<Self> {
        config.validate()?;
        let ring = RingBuffer::new(config.capacity)?;
        Ok(AudioStream {
            config,
            ring,
            phase: StreamPhase::Idle,
            primed: 0,
            pending: None,
            muted: false,
            sink,
            stats: StreamStats::default(),
        })
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// The sink has been started.
    pub fn playing(&self) -> bool {
        self.phase == StreamPhase::Active
    }

    /// Priming has finished, so the fill level means something.
    pub fn fill_known(&self) -> bool {
        self.phase == StreamPhase::Active
    }

    /// Feedback is computed from the read position.
    pub fn read_enabled(&self) -> bool {
        self.phase == StreamPhase::Active
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn buffer(&self) -> &[u8] {
        self.ring.as_slice()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The streaming alternate setting was selected. Any previous stream is
    /// dropped and priming starts over.
    pub fn activate(&mut self, feedback: &FeedbackState) -> Result<()> {
        self.check_feedback(feedback)?;
        self.teardown(feedback);
        if let Err(e) = self
            .sink
            .init(self.config.sample_rate, DEFAULT_VOLUME, CHANNELS)
        {
            log::error!("audio sink init failed: {:?}", e);
            return Err(Error::SinkInit);
        }
        if self.muted {
            self.sink.set_mute(true);
        }
        self.phase = StreamPhase::Priming;
        feedback.start();
        log::info!("stream priming ({} byte buffer)", self.ring.capacity());
        Ok(())
    }

    /// Fails if `feedback` was built for a different buffer or controller.
    pub fn check_feedback(&self, feedback: &FeedbackState) -> Result<()> {
        if *feedback.config() != self.config {
            log::error!(
                "feedback config {:?} does not match stream config {:?}",
                feedback.config(),
                self.config
            );
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// Zero-bandwidth setting, interface teardown, or an unrecoverable
    /// isochronous error.
    pub fn deactivate(&mut self, feedback: &FeedbackState) {
        let was = self.phase;
        self.teardown(feedback);
        if was != StreamPhase::Idle {
            log::info!("stream idle (was {:?})", was);
        }
    }

    fn teardown(&mut self, feedback: &FeedbackState) {
        if self.phase == StreamPhase::Active {
            self.sink.stop();
        }
        self.phase = StreamPhase::Idle;
        self.primed = 0;
        self.pending = None;
        self.ring.clear();
        feedback.stop();
    }

    /// Takes one OUT packet into the ring.
    pub fn receive(&mut self, packet: &[u8]) {
        if self.phase == StreamPhase::Idle {
            return;
        }
        if packet.len() > self.config.max_packet_size {
            self.stats.dropped_packets = self.stats.dropped_packets.wrapping_add(1);
            log::debug!("dropping oversized packet ({} bytes)", packet.len());
            return;
        }
        let partial = packet.len() % FRAME_SIZE;
        let data = &packet[..packet.len() - partial];
        self.stats.truncated_bytes = self.stats.truncated_bytes.wrapping_add(partial as u32);
        if data.is_empty() {
            return;
        }

        if self.phase == StreamPhase::Active && data.len() > self.ring.occupancy().free_bytes() {
            self.stats.overruns = self.stats.overruns.wrapping_add(1);
            log::trace!("ring overrun");
        }
        self.ring.push(data);
        self.stats.received_bytes = self.stats.received_bytes.wrapping_add(data.len() as u32);

        if self.phase == StreamPhase::Priming {
            self.primed += data.len();
            if self.primed > self.config.priming_threshold() {
                self.begin_playback();
            }
        }
    }

    fn begin_playback(&mut self) {
        self.phase = StreamPhase::Active;
        let chunk = self.ring.capacity() / 2;
        self.sink.start(self.ring.as_slice(), chunk);
        log::info!(
            "stream active after {} bytes, chunk {}",
            self.primed,
            chunk
        );
    }

    /// Start-of-frame work: refresh the read position, run the controller, and
    /// claim the feedback endpoint if this frame is eligible. Returns the
    /// packet the caller must now transmit.
    pub fn tick(
        &mut self,
        feedback: &FeedbackState,
        frame_number: u16,
    ) -> Option<[u8; FEEDBACK_PACKET_SIZE]> {
        if self.phase != StreamPhase::Active {
            return None;
        }
        self.ring.sample_read_position(self.sink.remaining());
        feedback.update(self.ring.free_slots());
        if feedback.gate().try_submit(frame_number) {
            Some(feedback.packet())
        } else {
            None
        }
    }

    /// The OUT transfer for this frame never arrived.
    pub fn out_incomplete(&mut self) {
        self.stats.out_incomplete = self.stats.out_incomplete.wrapping_add(1);
    }

    /// Setup stage of a class SET request. Returns `false` for requests this
    /// stream does not own.
    pub fn begin_control(&mut self, req: &ControlRequest) -> bool {
        if req.kind != RequestKind::SetCur || !req.is_mute(MUTE_UNIT_ID) || req.length == 0 {
            return false;
        }
        self.pending = Some(PendingControl::new(req.kind, req.unit, req.length as usize));
        true
    }

    /// Data stage of the SET request recorded by `begin_control`.
    pub fn complete_control(&mut self, data: &[u8]) {
        let mut pending = match self.pending.take() {
            Some(p) => p,
            None => return,
        };
        pending.fill(data);
        if pending.kind == RequestKind::SetCur && pending.unit == MUTE_UNIT_ID {
            if let Some(&value) = pending.payload().first() {
                self.muted = value != 0;
                self.sink.set_mute(self.muted);
                log::info!("mute {}", self.muted);
            }
        }
    }

    pub fn has_pending_control(&self) -> bool {
        self.pending.is_some()
    }

    /// GET_CUR on a control this stream owns.
    pub fn get_cur(&self, req: &ControlRequest) -> Option<u8> {
        if req.kind == RequestKind::GetCur && req.is_mute(MUTE_UNIT_ID) {
            Some(self.muted as u8)
        } else {
            None
        }
    }
}
