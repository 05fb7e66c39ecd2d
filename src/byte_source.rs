//! A byte source with an opt-in recording facility.
//!
//! Mirrors every byte actually delivered to consumers into a growable
//! buffer while recording is active, so that the decoder can capture the
//! raw prefix of an object whose serialization was interrupted by an
//! embedded exception (`spec.md` §4.1, §4.4 Exception subprotocol).

use std::io::Read;

use crate::error::{DecodeError, DecodeResult};

/// Wraps an underlying [`Read`] with sequential reads plus recording.
///
/// Not [`Send`]/[`Sync`] by design: per `spec.md` §5, a source is owned
/// exclusively by one decoder on one thread.
pub struct RecordingByteSource<R> {
    inner: R,
    offset: u64,
    recording: bool,
    buffer: Vec<u8>,
}

impl<R: Read> RecordingByteSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            recording: false,
            buffer: Vec::new(),
        }
    }

    /// Current byte offset from the start of the stream, used to annotate
    /// error messages.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Enters recording mode, clearing any previously captured buffer.
    pub fn start_recording(&mut self) {
        self.recording = true;
        self.buffer.clear();
    }

    /// Returns a copy of the bytes captured since the last
    /// [`start_recording`](Self::start_recording), without altering state.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.clone()
    }

    /// Exits recording mode and discards the buffer.
    ///
    /// # Panics
    /// Panics if recording is not currently active; this mirrors
    /// `spec.md` §4.1's "calling it while inactive is a usage error".
    pub fn stop_recording(&mut self) {
        assert!(self.recording, "stop_recording called while not recording");
        self.recording = false;
        self.buffer.clear();
    }

    /// Reads exactly `buf.len()` bytes, mirroring what a recording pass
    /// captures.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> DecodeResult<()> {
        self.inner.read_exact(buf).map_err(|_| {
            DecodeError::truncation(self.offset, format!("{} more byte(s)", buf.len()))
        })?;
        self.offset += buf.len() as u64;
        if self.recording {
            self.buffer.extend_from_slice(buf);
        }
        Ok(())
    }

    /// Reads and discards `count` bytes. Expressed as a bulk read into a
    /// scratch buffer so that, while recording, skipped bytes are mirrored
    /// too (`spec.md` §4.1).
    pub fn skip(&mut self, count: usize) -> DecodeResult<()> {
        let mut scratch = vec![0u8; count];
        self.read_exact(&mut scratch)
    }

    /// Reads one byte; returns `Ok(None)` on a clean EOF (no bytes read at
    /// all) and an error on a truncated multi-byte read elsewhere.
    pub fn read_tag(&mut self) -> DecodeResult<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.inner.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => {
                self.offset += 1;
                if self.recording {
                    self.buffer.push(byte[0]);
                }
                Ok(Some(byte[0]))
            }
            Err(_) => Err(DecodeError::truncation(self.offset, "a tag byte")),
        }
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_i64(&mut self) -> DecodeResult<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_bytes(&mut self, count: usize) -> DecodeResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_mirrors_sequential_reads() {
        let mut source = RecordingByteSource::new(&b"\x01\x02\x03\x04"[..]);
        source.read_u8().unwrap();
        source.start_recording();
        source.read_u8().unwrap();
        source.skip(1).unwrap();
        assert_eq!(source.snapshot(), vec![0x02, 0x03]);
        source.stop_recording();
        assert!(source.snapshot().is_empty());
    }

    #[test]
    fn offset_tracks_all_reads_even_unrecorded() {
        let mut source = RecordingByteSource::new(&b"\x00\x00\x00\x00"[..]);
        source.read_u32().unwrap();
        assert_eq!(source.offset(), 4);
    }

    #[test]
    #[should_panic]
    fn stop_recording_while_inactive_panics() {
        let mut source = RecordingByteSource::new(&b""[..]);
        source.stop_recording();
    }

    #[test]
    fn read_tag_reports_clean_eof() {
        let mut source = RecordingByteSource::new(&b""[..]);
        assert_eq!(source.read_tag().unwrap(), None);
    }
}
