//! Bit-exact reader and writer layer for RIFF/WAVE files and their 64-bit
//! BW64 (ITU-R BS.2088) / RF64 (EBU Tech 3306) extensions.
//!
//! The layer is self-contained and reusable: the audio path of the virtual
//! filesystem is its only in-crate consumer, but nothing here knows about
//! recordings or entries. The on-disk model is the classic chunk stream:
//! a 12-byte file header followed by `{id, size32, payload, pad}` chunks,
//! with the `ds64` chunk supplying 64-bit size overrides whenever a 32-bit
//! field cannot express the real size.
//!
//! Parsing is strict. A file either parses completely, with every chunk
//! bounded by the end of the file and every stored `fmt ` field matching
//! its derived value, or it is rejected with a [`Bw64Error`]; there is no
//! partial acceptance.

mod chunks;
pub mod io;
mod parser;
mod reader;
mod writer;

pub use chunks::{
    AudioId, AxmlChunk, Chunk, ChnaChunk, ChunkHeader, DataChunk, DataSize64Chunk, ExtraData,
    FormatInfoChunk, UnknownChunk,
};
pub use io::{decode_pcm_samples, encode_pcm_samples, FourCc, Sample};
pub use reader::Bw64Reader;
pub use writer::AudioWriter;

use thiserror::Error;

/// Errors produced by the WAV layer. All of them are fatal for the file
/// being parsed.
#[derive(Debug, Error)]
pub enum Bw64Error {
    /// Wrapper around IO errors encountered while reading or writing the
    /// stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error returned when the stream ends in the middle of a value or
    /// chunk payload.
    #[error("stream ended unexpectedly")]
    UnexpectedEof,

    /// Error returned when the file header or a chunk payload does not
    /// follow the RIFF/BW64/RF64 layout.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Error returned when a mandatory `fmt ` or `data` chunk is absent.
    #[error("mandatory '{0}' chunk not found")]
    MissingMandatoryChunk(FourCc),

    /// Error returned when a BW64/RF64 file does not start with the
    /// `ds64` chunk its 64-bit sizes depend on.
    #[error("mandatory ds64 chunk for {0} file not found")]
    MissingDs64(FourCc),

    /// Error returned when a chunk, pad byte included, extends past the
    /// end of the file.
    #[error("chunk '{id}' at offset {position} ends after end of file")]
    TruncatedChunk { id: FourCc, position: u64 },

    /// Error returned when PCM data uses a bit depth other than 16, 24
    /// or 32.
    #[error("unsupported number of bits: {0}")]
    UnsupportedBitDepth(u16),

    /// Error returned when the `fmt ` chunk carries a format tag other
    /// than PCM or EXTENSIBLE.
    #[error("unsupported format tag: {0:#06x}")]
    UnsupportedFormatTag(u16),

    /// Error returned when a stored field disagrees with the value
    /// derived from the rest of the header.
    #[error("sanity check failed: '{field}' is {stored} but should be {derived}")]
    SanityCheckFailed {
        field: &'static str,
        stored: u64,
        derived: u64,
    },

    /// Error returned when offset arithmetic would exceed the
    /// representable range.
    #[error("arithmetic overflow")]
    Overflow,

    /// Error returned when the stream position falls before the start of
    /// the `data` chunk.
    #[error("arithmetic underflow")]
    Underflow,
}
