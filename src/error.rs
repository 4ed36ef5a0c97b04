use usb_device::UsbError;

/// Errors surfaced to the device stack. Everything that happens per packet or
/// per tick is recovered locally and only shows up in the stream counters.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// The ring buffer could not be allocated.
    OutOfMemory,
    /// A `Config` value that the engine cannot run with.
    InvalidConfig,
    /// The playback sink refused to initialize.
    SinkInit,
    /// Endpoint allocation or another device stack call failed.
    Usb(UsbError),
}

impl From<UsbError> for Error {
    fn from(err: UsbError) -> Self {
        Error::Usb(err)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "out of memory allocating audio buffer"),
            Error::InvalidConfig => write!(f, "invalid stream configuration"),
            Error::SinkInit => write!(f, "audio sink failed to initialize"),
            Error::Usb(e) => write!(f, "usb error: {:?}", e),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn usb_errors_convert() {
        assert_eq!(
            Error::from(UsbError::EndpointMemoryOverflow),
            Error::Usb(UsbError::EndpointMemoryOverflow)
        );
    }
}
