//! The payload the close test streams from server to client.
//!
//! Byte `i` is `i % 251`. The prime period never lines up with a frame
//! boundary, so a dropped or repeated frame shows up as a mismatch.

use std::io;

pub const DEFAULT_LEN: usize = 64 * 1024;

const PERIOD: usize = 251;

fn byte_at(offset: usize) -> u8 {
    (offset % PERIOD) as u8
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(byte_at).collect()
}

/// Sink that checks bytes against the pattern as they stream in.
#[derive(Debug, Default)]
pub struct PatternCheck {
    received: u64,
    first_mismatch: Option<u64>,
}

impl PatternCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Offset of the first byte that broke the pattern.
    pub fn first_mismatch(&self) -> Option<u64> {
        self.first_mismatch
    }
}

impl io::Write for PatternCheck {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.first_mismatch.is_none() {
            let start = self.received;
            self.first_mismatch = buf
                .iter()
                .zip(start..)
                .find(|&(&byte, offset)| byte != byte_at(offset as usize))
                .map(|(_, offset)| offset);
        }
        self.received += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn split_writes_match_the_payload() {
        let data = payload(10_000);
        let mut check = PatternCheck::new();
        for chunk in data.chunks(333) {
            check.write_all(chunk).unwrap();
        }
        assert_eq!(check.received(), 10_000);
        assert_eq!(check.first_mismatch(), None);
    }

    #[test]
    fn reports_first_corrupted_offset() {
        let mut data = payload(600);
        data[300] ^= 0xff;
        data[400] ^= 0xff;

        let mut check = PatternCheck::new();
        check.write_all(&data[..256]).unwrap();
        check.write_all(&data[256..]).unwrap();
        assert_eq!(check.first_mismatch(), Some(300));
    }

    #[test]
    fn missing_frame_breaks_the_pattern() {
        let data = payload(3 * 4096);
        let mut check = PatternCheck::new();
        check.write_all(&data[..4096]).unwrap();
        check.write_all(&data[8192..]).unwrap();
        assert_eq!(check.received(), 8192);
        assert_eq!(check.first_mismatch(), Some(4096));
    }
}
