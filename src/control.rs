use modular_bitfield::prelude::*;
use usb_device::control::{Recipient, Request, RequestType};

/// Feature unit control selector for mute.
pub const MUTE_CONTROL: u8 = 0x01;

/// Largest control data stage we keep.
pub const MAX_CONTROL_DATA: usize = 64;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum RequestKind {
    SetCur,
    SetMin,
    SetMax,
    SetRes,
    GetCur,
    GetMin,
    GetMax,
    GetRes,
}

impl RequestKind {
    fn from_raw(raw: u8) -> Option<RequestKind> {
        match raw {
            0x01 => Some(RequestKind::SetCur),
            0x02 => Some(RequestKind::SetMin),
            0x03 => Some(RequestKind::SetMax),
            0x04 => Some(RequestKind::SetRes),
            0x81 => Some(RequestKind::GetCur),
            0x82 => Some(RequestKind::GetMin),
            0x83 => Some(RequestKind::GetMax),
            0x84 => Some(RequestKind::GetRes),
            _ => None,
        }
    }
}

// wValue of a feature unit request
#[bitfield]
struct ControlValue {
    channel: B8,
    selector: B8,
}

// wIndex of a request addressed to a unit
#[bitfield]
struct ControlIndex {
    interface: B8,
    entity: B8,
}

/// A class request addressed to a unit of the audio control interface.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ControlRequest {
    pub kind: RequestKind,
    pub unit: u8,
    pub interface: u8,
    pub selector: u8,
    pub channel: u8,
    pub length: u16,
}

impl ControlRequest {
    pub fn is_mute(&self, mute_unit: u8) -> bool {
        self.unit == mute_unit && self.selector == MUTE_CONTROL
    }
}

pub fn parse_control(req: &Request) -> Option<ControlRequest> {
    if req.request_type != RequestType::Class || req.recipient != Recipient::Interface {
        return None;
    }
    let kind = RequestKind::from_raw(req.request)?;
    let value = ControlValue::from_bytes(req.value.to_le_bytes());
    let index = ControlIndex::from_bytes(req.index.to_le_bytes());
    Some(ControlRequest {
        kind,
        unit: index.entity(),
        interface: index.interface(),
        selector: value.selector(),
        channel: value.channel(),
        length: req.length,
    })
}

/// A SET request whose data stage has not been applied yet.
#[derive(Clone, Copy, Debug)]
pub struct PendingControl {
    pub kind: RequestKind,
    pub unit: u8,
    pub data: [u8; MAX_CONTROL_DATA],
    pub len: usize,
}

impl PendingControl {
    pub fn new(kind: RequestKind, unit: u8, len: usize) -> Self {
        PendingControl {
            kind,
            unit,
            data: [0; MAX_CONTROL_DATA],
            len: len.min(MAX_CONTROL_DATA),
        }
    }

    /// Copies in the data stage, truncated to the length announced in setup.
    pub fn fill(&mut self, data: &[u8]) {
        let n = data.len().min(self.len);
        self.data[..n].copy_from_slice(&data[..n]);
        self.len = n;
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use usb_device::UsbDirection;

    fn request(request_type: RequestType, request: u8, value: u16, index: u16) -> Request {
        Request {
            direction: UsbDirection::Out,
            request_type,
            recipient: Recipient::Interface,
            request,
            value,
            index,
            length: 1,
        }
    }

    #[test]
    fn parses_mute_set_cur() {
        let req = request(RequestType::Class, 0x01, 0x0100, 0x0200);
        let parsed = parse_control(&req).unwrap();
        assert_eq!(parsed.kind, RequestKind::SetCur);
        assert_eq!(parsed.unit, 2);
        assert_eq!(parsed.interface, 0);
        assert_eq!(parsed.selector, MUTE_CONTROL);
        assert_eq!(parsed.channel, 0);
        assert!(parsed.is_mute(2));
        assert!(!parsed.is_mute(3));
    }

    #[test]
    fn parses_get_cur_with_channel() {
        let req = request(RequestType::Class, 0x81, 0x0102, 0x0501);
        let parsed = parse_control(&req).unwrap();
        assert_eq!(parsed.kind, RequestKind::GetCur);
        assert_eq!(parsed.unit, 5);
        assert_eq!(parsed.interface, 1);
        assert_eq!(parsed.channel, 2);
    }

    #[test]
    fn ignores_standard_and_unknown() {
        assert!(parse_control(&request(RequestType::Standard, 0x0b, 1, 1)).is_none());
        assert!(parse_control(&request(RequestType::Class, 0x42, 0, 0)).is_none());
    }

    #[test]
    fn pending_truncates_to_setup_length() {
        let mut pending = PendingControl::new(RequestKind::SetCur, 2, 1);
        pending.fill(&[1, 9, 9]);
        assert_eq!(pending.payload(), &[1]);

        let mut pending = PendingControl::new(RequestKind::SetCur, 2, 200);
        assert_eq!(pending.len, MAX_CONTROL_DATA);
        pending.fill(&[0]);
        assert_eq!(pending.payload(), &[0]);
    }
}
