/// The playback side: typically a DMA stream feeding an I2S DAC in circular
/// mode over the ring buffer.
pub trait AudioSink {
    /// Prepares the output path. Called each time the streaming interface is
    /// selected.
    fn init(&mut self, sample_rate: u32, volume: u8, channels: u8) -> Result<(), SinkError>;

    /// Starts consuming `buffer` in a loop, `chunk_size` bytes per half
    /// transfer.
    fn start(&mut self, buffer: &[u8], chunk_size: usize);

    fn stop(&mut self);

    fn set_mute(&mut self, muted: bool);

    /// Bytes left before the current circular pass wraps, as read from the
    /// transfer-count register.
    fn remaining(&self) -> usize;
}

/// The sink could not bring up its output path.
#[derive(Debug, PartialEq)]
pub struct SinkError;
