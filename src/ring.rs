use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::FRAME_SIZE;
use crate::error::{Error, Result};

/// Circular byte buffer between the USB OUT endpoint and the playback DMA.
///
/// Only the OUT handler moves the write cursor (through `push`) and only the
/// tick handler moves the read cursor (through `sample_read_position`). Each
/// cursor is a single word, so a reader interrupted between the two loads
/// still sees two values that were each valid on their own.
///
/// `push` never looks at the reader. If the consumer falls behind, new samples
/// overwrite ones it has not played yet.
pub struct RingBuffer {
    buffer: Vec<u8>,
    write: AtomicUsize,
    read: AtomicUsize,
}

/// A snapshot of both cursors, taken once so that free and used space are
/// computed from the same pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Occupancy {
    pub read: usize,
    pub write: usize,
    pub capacity: usize,
}

impl Occupancy {
    pub fn free_bytes(&self) -> usize {
        if self.read < self.write {
            self.read + self.capacity - self.write
        } else {
            self.read - self.write
        }
    }

    pub fn free_slots(&self) -> usize {
        self.free_bytes() / FRAME_SIZE
    }

    pub fn used_slots(&self) -> usize {
        self.capacity / FRAME_SIZE - self.free_slots()
    }
}

impl RingBuffer {
    /// Allocates a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity % FRAME_SIZE != 0 {
            return Err(Error::InvalidConfig);
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory)?;
        buffer.resize(capacity, 0);
        Ok(RingBuffer {
            buffer,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Appends `bytes` at the write cursor, wrapping at the end of the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        let capacity = self.capacity();
        let mut write = self.write.load(Ordering::Relaxed);
        let mut rest = bytes;
        while !rest.is_empty() {
            let n = rest.len().min(capacity - write);
            self.buffer[write..write + n].copy_from_slice(&rest[..n]);
            write += n;
            if write == capacity {
                write = 0;
            }
            rest = &rest[n..];
        }
        self.write.store(write, Ordering::Release);
    }

    /// Recomputes the read cursor from the consumer's transfer-count register,
    /// which counts down the bytes left before its circular transfer wraps.
    pub fn sample_read_position(&self, remaining: usize) {
        let capacity = self.capacity();
        let read = (capacity - remaining.min(capacity)) % capacity;
        self.read.store(read, Ordering::Release);
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            read: self.read.load(Ordering::Acquire),
            write: self.write.load(Ordering::Acquire),
            capacity: self.capacity(),
        }
    }

    pub fn free_slots(&self) -> usize {
        self.occupancy().free_slots()
    }

    pub fn used_slots(&self) -> usize {
        self.occupancy().used_slots()
    }

    pub fn write_cursor(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    pub fn read_cursor(&self) -> usize {
        self.read.load(Ordering::Acquire)
    }

    /// Zeroes the contents and rewinds both cursors.
    pub fn clear(&mut self) {
        for b in self.buffer.iter_mut() {
            *b = 0;
        }
        self.write.store(0, Ordering::Release);
        self.read.store(0, Ordering::Release);
    }

    /// The whole backing store, as handed to the playback DMA.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_cursor_tracks_total_pushed() {
        let mut ring = RingBuffer::new(64).unwrap();
        let mut total = 0;
        for len in [4, 12, 60, 8, 64, 132, 0, 16].iter() {
            let data = vec![0xab; *len];
            ring.push(&data);
            total += len;
            assert_eq!(ring.write_cursor(), total % 64);
        }
    }

    #[test]
    fn push_wraps_contents() {
        let mut ring = RingBuffer::new(16).unwrap();
        ring.push(&[1; 12]);
        ring.push(&[2, 2, 2, 2, 3, 3, 3, 3]);
        assert_eq!(ring.write_cursor(), 4);
        assert_eq!(
            ring.as_slice(),
            &[3, 3, 3, 3, 1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2]
        );
    }

    #[test]
    fn free_slots_formula() {
        let mut ring = RingBuffer::new(4096).unwrap();
        ring.push(&[0; 2096]);
        ring.sample_read_position(4096 - 512);
        assert_eq!(ring.read_cursor(), 512);
        // Reader behind writer: the free span wraps past the end.
        assert_eq!(ring.free_slots(), (512 + 4096 - 2096) / 4);

        ring.sample_read_position(4096 - 3000);
        // Reader ahead of writer.
        assert_eq!(ring.free_slots(), (3000 - 2096) / 4);

        // Equal cursors read as no free space.
        ring.sample_read_position(4096 - 2096);
        assert_eq!(ring.free_slots(), 0);
    }

    #[test]
    fn free_plus_used_is_capacity() {
        let mut ring = RingBuffer::new(256).unwrap();
        for step in 0..40 {
            ring.push(&[0; 28]);
            ring.sample_read_position(256 - (step * 36) % 256);
            let occ = ring.occupancy();
            assert_eq!(occ.free_slots() + occ.used_slots(), 256 / FRAME_SIZE);
        }
    }

    #[test]
    fn read_position_stays_in_range() {
        let ring = RingBuffer::new(64).unwrap();
        ring.sample_read_position(64);
        assert_eq!(ring.read_cursor(), 0);
        ring.sample_read_position(1000);
        assert_eq!(ring.read_cursor(), 0);
        ring.sample_read_position(1);
        assert_eq!(ring.read_cursor(), 63);
    }

    #[test]
    fn clear_rewinds() {
        let mut ring = RingBuffer::new(32).unwrap();
        ring.push(&[7; 20]);
        ring.sample_read_position(10);
        ring.clear();
        assert_eq!(ring.write_cursor(), 0);
        assert_eq!(ring.read_cursor(), 0);
        assert!(ring.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn rejects_partial_frame_capacity() {
        assert!(RingBuffer::new(0).is_err());
        assert_eq!(RingBuffer::new(30).err(), Some(Error::InvalidConfig));
    }
}
