//! In-memory serializer for the projected `audio.wav` entry.

use super::io::{write_u16, write_u32};
use super::Bw64Error;

const HEADER_LEN: usize = 44;
const BITS_PER_SAMPLE: u16 = 16;

/// Serializes interleaved 16-bit PCM into a standard RIFF/WAVE held in
/// memory.
///
/// The header is written up front with placeholder sizes; [`finish`]
/// patches the RIFF and `data` sizes once the sample count is known and
/// hands back the buffer.
///
/// [`finish`]: AudioWriter::finish
///
/// # Examples
///
/// ```
/// use mcrawfs_core::bw64::{AudioWriter, Bw64Reader};
/// use std::io::Cursor;
///
/// let mut writer = AudioWriter::new(2, 48_000)?;
/// writer.write(&[0, 0, 100, -100])?;
/// let wav = writer.finish()?;
///
/// let reader = Bw64Reader::new(Cursor::new(wav))?;
/// assert_eq!(reader.channels(), 2);
/// assert_eq!(reader.number_of_frames(), 2);
/// # Ok::<(), mcrawfs_core::bw64::Bw64Error>(())
/// ```
pub struct AudioWriter {
    buffer: Vec<u8>,
    channels: u16,
    sample_rate: u32,
}

impl AudioWriter {
    pub fn new(channels: u16, sample_rate: u32) -> Result<Self, Bw64Error> {
        if channels == 0 {
            return Err(Bw64Error::InvalidFormat("zero audio channels".into()));
        }
        let block_alignment = channels
            .checked_mul(BITS_PER_SAMPLE / 8)
            .ok_or(Bw64Error::Overflow)?;
        let bytes_per_second = sample_rate
            .checked_mul(u32::from(block_alignment))
            .ok_or(Bw64Error::Overflow)?;

        let mut buffer = Vec::with_capacity(HEADER_LEN);
        buffer.extend_from_slice(b"RIFF");
        write_u32(&mut buffer, 0)?; // patched by finish()
        buffer.extend_from_slice(b"WAVE");
        buffer.extend_from_slice(b"fmt ");
        write_u32(&mut buffer, 16)?;
        write_u16(&mut buffer, 1)?; // PCM
        write_u16(&mut buffer, channels)?;
        write_u32(&mut buffer, sample_rate)?;
        write_u32(&mut buffer, bytes_per_second)?;
        write_u16(&mut buffer, block_alignment)?;
        write_u16(&mut buffer, BITS_PER_SAMPLE)?;
        buffer.extend_from_slice(b"data");
        write_u32(&mut buffer, 0)?; // patched by finish()

        Ok(Self {
            buffer,
            channels,
            sample_rate,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Append interleaved samples.
    pub fn write(&mut self, samples: &[i16]) -> Result<(), Bw64Error> {
        for sample in samples {
            self.buffer.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(())
    }

    /// Number of sample frames written so far.
    pub fn frames_written(&self) -> u64 {
        (self.buffer.len() - HEADER_LEN) as u64 / (u64::from(self.channels) * 2)
    }

    /// Patch the size fields and hand back the finished file.
    ///
    /// 16-bit samples keep the `data` chunk even, so no pad byte is needed.
    pub fn finish(self) -> Result<Vec<u8>, Bw64Error> {
        let mut buffer = self.buffer;
        let data_len = u32::try_from(buffer.len() - HEADER_LEN).map_err(|_| Bw64Error::Overflow)?;
        let riff_len = data_len.checked_add(36).ok_or(Bw64Error::Overflow)?;

        buffer[4..8].copy_from_slice(&riff_len.to_le_bytes());
        buffer[40..44].copy_from_slice(&data_len.to_le_bytes());
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bw64::Bw64Reader;
    use std::io::Cursor;

    #[test]
    fn written_audio_parses_back() {
        let mut writer = AudioWriter::new(2, 48_000).expect("writer");
        let samples: Vec<i16> = (0..96).map(|n| (n * 300) as i16).collect();
        writer.write(&samples).expect("write");
        assert_eq!(writer.frames_written(), 48);

        let wav = writer.finish().expect("finish");
        let mut reader = Bw64Reader::new(Cursor::new(wav)).expect("parse");
        assert_eq!(reader.channels(), 2);
        assert_eq!(reader.sample_rate(), 48_000);
        assert_eq!(reader.bit_depth(), 16);
        assert_eq!(reader.number_of_frames(), 48);

        let mut decoded = vec![0.0f32; 96];
        assert_eq!(reader.read(&mut decoded).expect("read"), 48);
        assert!((decoded[2] - 600.0 / 32_767.0).abs() < 1e-6);
    }

    #[test]
    fn empty_audio_is_a_valid_file() {
        let writer = AudioWriter::new(1, 8_000).expect("writer");
        let wav = writer.finish().expect("finish");
        assert_eq!(wav.len(), 44);
        let reader = Bw64Reader::new(Cursor::new(wav)).expect("parse");
        assert_eq!(reader.number_of_frames(), 0);
    }

    #[test]
    fn zero_channels_are_rejected() {
        match AudioWriter::new(0, 8_000) {
            Err(Bw64Error::InvalidFormat(_)) => {}
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }
}
