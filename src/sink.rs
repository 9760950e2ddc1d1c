//! Raw sample log for offline threshold tuning.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::light::LightState;

/// Append-only sink of fixed-size sample records.
///
/// Each record is three bytes: timing low byte, timing high byte, state
/// tag. There is no header and no framing; a consumer has to know the
/// record size.
pub struct RawSampleSink {
    file: File,
}

impl RawSampleSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, timing_ms: u32, state: LightState) -> io::Result<()> {
        self.file.write_all(&encode_record(timing_ms, state))
    }
}

/// Encode one sample record. Timings beyond 16 bits saturate.
pub fn encode_record(timing_ms: u32, state: LightState) -> [u8; 3] {
    let timing = timing_ms.min(u32::from(u16::MAX)) as u16;
    [timing as u8, (timing >> 8) as u8, state.tag()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        assert_eq!(encode_record(0x0203, LightState::Bright), [0x03, 0x02, 1]);
        assert_eq!(encode_record(5, LightState::Unknown), [5, 0, 0]);
        assert_eq!(encode_record(256, LightState::Dark), [0, 1, 2]);
    }

    #[test]
    fn test_timing_saturates_to_u16() {
        assert_eq!(encode_record(70_000, LightState::Dark), [0xff, 0xff, 2]);
    }

    #[test]
    fn test_append_writes_flat_records() {
        let path = std::env::temp_dir().join(format!("ldr-reader-sink-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let mut sink = RawSampleSink::open(&path).unwrap();
            sink.append(300, LightState::Bright).unwrap();
            sink.append(70_000, LightState::Dark).unwrap();
        }
        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(bytes, vec![44, 1, 1, 0xff, 0xff, 2]);
    }
}
