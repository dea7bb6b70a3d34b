//! Low-level byte-stream primitives shared by the chunk parser, the reader
//! facade and the writer.
//!
//! Every numeric field in a RIFF/BW64/RF64 file is little-endian regardless
//! of the host, so all helpers here go through [`byteorder::LittleEndian`].

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::Bw64Error;

/// A four-character chunk identifier packed into a little-endian `u32`
/// (byte 0 of the tag becomes the low byte).
///
/// Identifiers compare by integer equality.
///
/// # Examples
///
/// ```
/// use mcrawfs_core::bw64::FourCc;
///
/// let id = FourCc::new(b"fmt ");
/// assert_eq!(id.to_string(), "fmt ");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const fn new(tag: &[u8; 4]) -> Self {
        FourCc(u32::from_le_bytes(*tag))
    }

    /// The four tag bytes in file order.
    pub fn bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes() {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

pub(crate) const RIFF: FourCc = FourCc::new(b"RIFF");
pub(crate) const BW64: FourCc = FourCc::new(b"BW64");
pub(crate) const RF64: FourCc = FourCc::new(b"RF64");
pub(crate) const WAVE: FourCc = FourCc::new(b"WAVE");
pub(crate) const DS64: FourCc = FourCc::new(b"ds64");
pub(crate) const FMT: FourCc = FourCc::new(b"fmt ");
pub(crate) const DATA: FourCc = FourCc::new(b"data");
pub(crate) const AXML: FourCc = FourCc::new(b"axml");
pub(crate) const CHNA: FourCc = FourCc::new(b"chna");

/// Distinguish a short read from any other stream failure.
pub(crate) fn map_read_err(err: io::Error) -> Bw64Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Bw64Error::UnexpectedEof
    } else {
        Bw64Error::Io(err)
    }
}

pub fn read_u16<R: Read>(stream: &mut R) -> Result<u16, Bw64Error> {
    stream.read_u16::<LittleEndian>().map_err(map_read_err)
}

pub fn read_u32<R: Read>(stream: &mut R) -> Result<u32, Bw64Error> {
    stream.read_u32::<LittleEndian>().map_err(map_read_err)
}

pub fn read_u64<R: Read>(stream: &mut R) -> Result<u64, Bw64Error> {
    stream.read_u64::<LittleEndian>().map_err(map_read_err)
}

pub fn read_four_cc<R: Read>(stream: &mut R) -> Result<FourCc, Bw64Error> {
    Ok(FourCc(stream.read_u32::<LittleEndian>().map_err(map_read_err)?))
}

/// Fill `dest` from the stream. A zero-length destination is a no-op.
pub fn read_exact_chunk<R: Read>(stream: &mut R, dest: &mut [u8]) -> Result<(), Bw64Error> {
    if !dest.is_empty() {
        stream.read_exact(dest).map_err(map_read_err)?;
    }
    Ok(())
}

pub fn write_u16<W: Write>(stream: &mut W, value: u16) -> Result<(), Bw64Error> {
    stream.write_u16::<LittleEndian>(value).map_err(Bw64Error::Io)
}

pub fn write_u32<W: Write>(stream: &mut W, value: u32) -> Result<(), Bw64Error> {
    stream.write_u32::<LittleEndian>(value).map_err(Bw64Error::Io)
}

/// Write a chunk payload, appending the pad byte RIFF requires after an
/// odd-sized payload.
pub fn write_padded_chunk<W: Write>(stream: &mut W, payload: &[u8]) -> Result<(), Bw64Error> {
    stream.write_all(payload).map_err(Bw64Error::Io)?;
    if payload.len() % 2 == 1 {
        stream.write_all(&[0]).map_err(Bw64Error::Io)?;
    }
    Ok(())
}

/// Checked narrowing conversion; anything that does not fit is an overflow.
pub fn safe_cast<To, From>(value: From) -> Result<To, Bw64Error>
where
    To: TryFrom<From>,
{
    To::try_from(value).map_err(|_| Bw64Error::Overflow)
}

pub fn safe_add(a: u64, b: u64) -> Result<u64, Bw64Error> {
    a.checked_add(b).ok_or(Bw64Error::Overflow)
}

/// Floating-point sample type PCM data can be decoded into.
pub trait Sample: Copy + Default {
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl Sample for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }
}

fn clip(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

/// Decode interleaved integer PCM into normalized samples in `[-1, +1]`.
///
/// `input` must hold `output.len()` samples at the given depth. 24-bit
/// samples are packed into the high three bytes of an `i32` before
/// normalizing, mirroring the on-disk layout.
pub fn decode_pcm_samples<S: Sample>(
    input: &[u8],
    output: &mut [S],
    bits_per_sample: u16,
) -> Result<(), Bw64Error> {
    match bits_per_sample {
        16 => {
            for (bytes, out) in input.chunks_exact(2).zip(output.iter_mut()) {
                let value = i16::from_le_bytes([bytes[0], bytes[1]]);
                *out = S::from_f64(value as f64 / 32767.0);
            }
        }
        24 => {
            for (bytes, out) in input.chunks_exact(3).zip(output.iter_mut()) {
                let value = ((bytes[2] as u32) << 24
                    | (bytes[1] as u32) << 16
                    | (bytes[0] as u32) << 8) as i32;
                *out = S::from_f64(value as f64 / 2147483647.0);
            }
        }
        32 => {
            for (bytes, out) in input.chunks_exact(4).zip(output.iter_mut()) {
                let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                *out = S::from_f64(value as f64 / 2147483647.0);
            }
        }
        other => return Err(Bw64Error::UnsupportedBitDepth(other)),
    }
    Ok(())
}

/// Encode normalized samples as interleaved integer PCM, clipping to
/// `[-1, +1]` first. The scales are the exact inverses of
/// [`decode_pcm_samples`], so a round trip stays within one quantization
/// step at every depth.
pub fn encode_pcm_samples<S: Sample>(
    input: &[S],
    output: &mut Vec<u8>,
    bits_per_sample: u16,
) -> Result<(), Bw64Error> {
    match bits_per_sample {
        16 => {
            for sample in input {
                let value = (clip(sample.to_f64()) * 32767.0).round() as i16;
                output.extend_from_slice(&value.to_le_bytes());
            }
        }
        24 => {
            for sample in input {
                let value = (clip(sample.to_f64()) * 2147483647.0 / 256.0).round() as i64;
                let value = value.clamp(-8_388_608, 8_388_607) as i32;
                output.extend_from_slice(&value.to_le_bytes()[..3]);
            }
        }
        32 => {
            for sample in input {
                let value = (clip(sample.to_f64()) * 2147483647.0).round() as i32;
                output.extend_from_slice(&value.to_le_bytes());
            }
        }
        other => return Err(Bw64Error::UnsupportedBitDepth(other)),
    }
    Ok(())
}
