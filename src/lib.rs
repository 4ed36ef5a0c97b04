//! Asynchronous USB Audio Class 1.0 playback with explicit feedback.
//!
//! The host streams 16-bit stereo PCM to an isochronous OUT endpoint. The
//! samples land in a ring buffer that a playback DMA drains on its own clock,
//! which is not locked to the host's. Once per frame the fill level of the
//! ring is turned into a rate correction and reported on an isochronous IN
//! feedback endpoint, so the host speeds up or slows down to keep the buffer
//! near its operating point.
//!
//! `usb-device` has no start-of-frame or incomplete-transfer hooks, so the
//! board's USB interrupt calls [`UsbAudio::sof`], [`UsbAudio::iso_in_incomplete`]
//! and [`UsbAudio::iso_out_incomplete`] itself. All entry points take
//! `&mut self`; share the class between interrupts behind a critical-section
//! mutex. The feedback state only needs `&`, and is normally a `static`.
//!
//! Descriptors are not written by this class. The application's descriptor
//! tables refer to [`UsbAudio::streaming_interface`] and the two endpoint
//! addresses.
//!
//! ```ignore
//! static FEEDBACK: FeedbackState = FeedbackState::new(Config::DEFAULT);
//!
//! let mut audio = UsbAudio::new(&usb_bus, &FEEDBACK, I2sDma::new(..), Config::DEFAULT)?;
//!
//! // USB interrupt
//! if sof_pending {
//!     audio.sof(frame_number());
//! }
//! if iso_in_incomplete_pending && audio.iso_in_incomplete(frame_number()) {
//!     flush_tx_fifo(audio.feedback_endpoint_address());
//! }
//! device.poll(&mut [&mut audio]);
//! ```
#![no_std]

#[cfg_attr(test, macro_use)]
extern crate alloc;

use usb_device::class_prelude::*;
use usb_device::endpoint::{EndpointType, IsochronousSynchronizationType, IsochronousUsageType};
use usb_device::UsbError;

pub mod config;
mod control;
mod error;
mod feedback;
mod gate;
mod ring;
mod sink;
mod stream;

pub use crate::config::Config;
pub use crate::control::{ControlRequest, RequestKind};
pub use crate::error::{Error, Result};
pub use crate::feedback::{decode, encode, nominal_for_rate, FeedbackState};
pub use crate::gate::{TransmissionGate, TxState};
pub use crate::ring::{Occupancy, RingBuffer};
pub use crate::sink::{AudioSink, SinkError};
pub use crate::stream::{AudioStream, StreamPhase, StreamStats};

use crate::config::{FEEDBACK_PACKET_SIZE, MAX_ISO_PACKET};
use crate::control::parse_control;

const STREAMING_ALT: u8 = 1;

pub struct UsbAudio<'a, 'f, B: UsbBus, S: AudioSink> {
    control_iface: InterfaceNumber,
    stream_iface: InterfaceNumber,
    data_ep: EndpointOut<'a, B>,
    feedback_ep: EndpointIn<'a, B>,
    alt_setting: u8,
    stream: AudioStream<S>,
    feedback: &'f FeedbackState,
}

impl<'a, 'f, B: UsbBus, S: AudioSink> UsbAudio<'a, 'f, B, S> {
    pub fn new(
        alloc: &'a UsbBusAllocator<B>,
        feedback: &'f FeedbackState,
        sink: S,
        config: Config,
    ) -> Result<Self> {
        let stream = AudioStream::new(sink, config)?;
        stream.check_feedback(feedback)?;
        let data_ep: EndpointOut<'a, B> = alloc.alloc(
            None,
            EndpointType::Isochronous {
                synchronization: IsochronousSynchronizationType::Asynchronous,
                usage: IsochronousUsageType::Data,
            },
            config.max_packet_size as u16,
            1,
        )?;
        let feedback_ep: EndpointIn<'a, B> = alloc.alloc(
            None,
            EndpointType::Isochronous {
                synchronization: IsochronousSynchronizationType::NoSynchronization,
                usage: IsochronousUsageType::Feedback,
            },
            FEEDBACK_PACKET_SIZE as u16,
            1,
        )?;
        Ok(UsbAudio {
            control_iface: alloc.interface(),
            stream_iface: alloc.interface(),
            data_ep,
            feedback_ep,
            alt_setting: 0,
            stream,
            feedback,
        })
    }

    pub fn control_interface(&self) -> InterfaceNumber {
        self.control_iface
    }

    pub fn streaming_interface(&self) -> InterfaceNumber {
        self.stream_iface
    }

    pub fn data_endpoint_address(&self) -> EndpointAddress {
        self.data_ep.address()
    }

    pub fn feedback_endpoint_address(&self) -> EndpointAddress {
        self.feedback_ep.address()
    }

    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    pub fn stream(&self) -> &AudioStream<S> {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut AudioStream<S> {
        &mut self.stream
    }

    /// Start of frame. Runs the controller and, if the gate allows, queues a
    /// feedback packet.
    pub fn sof(&mut self, frame_number: u16) {
        let packet = match self.stream.tick(self.feedback, frame_number) {
            Some(p) => p,
            None => return,
        };
        if let Err(e) = self.feedback_ep.write(&packet) {
            // Nothing reached the endpoint, so nothing is in flight.
            self.feedback.gate().abort();
            log::debug!("feedback write refused: {:?}", e);
        }
    }

    /// The host did not collect the queued feedback packet in its frame.
    /// Returns `true` if the caller must flush the feedback endpoint's FIFO.
    pub fn iso_in_incomplete(&mut self, frame_number: u16) -> bool {
        let flush = self.feedback.gate().incomplete(frame_number);
        if flush {
            log::trace!("feedback incomplete at frame {}", frame_number);
        }
        flush
    }

    /// The OUT transfer for this frame did not complete. Whatever the
    /// endpoint holds is discarded so it is ready for the next packet.
    pub fn iso_out_incomplete(&mut self) {
        self.stream.out_incomplete();
        let mut buf = [0u8; MAX_ISO_PACKET];
        let _ = self.data_ep.read(&mut buf);
    }

    /// An isochronous error the stream cannot recover from. Playback stops
    /// until the host selects the streaming setting again.
    pub fn stream_error(&mut self) {
        log::warn!("stream error, stopping playback");
        self.stream.deactivate(self.feedback);
    }
}

impl<B: UsbBus, S: AudioSink> UsbClass<B> for UsbAudio<'_, '_, B, S> {
    fn reset(&mut self) {
        self.alt_setting = 0;
        self.stream.deactivate(self.feedback);
    }

    fn get_alt_setting(&mut self, interface: InterfaceNumber) -> Option<u8> {
        if interface == self.stream_iface {
            Some(self.alt_setting)
        } else {
            None
        }
    }

    fn set_alt_setting(&mut self, interface: InterfaceNumber, alt: u8) -> bool {
        if interface != self.stream_iface {
            return false;
        }
        let i: u8 = interface.into();
        log::info!("set_alt_setting(iface=0x{:x}, alt={})", i, alt);
        match alt {
            0 => {
                self.alt_setting = 0;
                self.stream.deactivate(self.feedback);
                true
            }
            STREAMING_ALT => match self.stream.activate(self.feedback) {
                Ok(()) => {
                    self.alt_setting = STREAMING_ALT;
                    true
                }
                Err(e) => {
                    log::error!("cannot start streaming: {}", e);
                    self.alt_setting = 0;
                    false
                }
            },
            _ => false,
        }
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = match parse_control(xfer.request()) {
            Some(req) => req,
            None => return,
        };
        if req.interface != u8::from(self.control_iface) {
            return;
        }
        match self.stream.get_cur(&req) {
            Some(value) => {
                if let Err(e) = xfer.accept_with(&[value]) {
                    log::error!("GET_CUR reply failed: {:?}", e);
                }
            }
            None => {
                log::info!(
                    "unhandled audio GET: {:?} CS={} chan={} unit={}",
                    req.kind,
                    req.selector,
                    req.channel,
                    req.unit
                );
                xfer.reject().ok();
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = match parse_control(xfer.request()) {
            Some(req) => req,
            None => return,
        };
        if req.interface != u8::from(self.control_iface) {
            return;
        }
        if self.stream.begin_control(&req) {
            // usb-device has already run the data stage.
            self.stream.complete_control(xfer.data());
            xfer.accept().ok();
        } else {
            log::info!(
                "unhandled audio SET: {:?} CS={} chan={} unit={}",
                req.kind,
                req.selector,
                req.channel,
                req.unit
            );
            xfer.reject().ok();
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr != self.data_ep.address() {
            return;
        }
        let mut buf = [0u8; MAX_ISO_PACKET];
        match self.data_ep.read(&mut buf) {
            Ok(nbytes) => self.stream.receive(&buf[..nbytes]),
            Err(UsbError::WouldBlock) => {}
            Err(e) => log::warn!("audio OUT read failed: {:?}", e),
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr == self.feedback_ep.address() {
            self.feedback.gate().complete();
        }
    }
}
