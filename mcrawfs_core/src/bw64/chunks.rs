//! The chunk model for RIFF/BW64/RF64 files.
//!
//! Chunks are modeled as one tagged enum instead of a class hierarchy; the
//! parser returns the variant directly and callers pattern match where the
//! original design downcast by chunk id.

use super::io::FourCc;

/// The 8-byte header preceding every chunk payload.
///
/// `position` is the absolute file offset of the header's first byte; the
/// payload starts at `position + 8`. `size` is the payload size after any
/// `ds64` override has been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: FourCc,
    pub size: u64,
    pub position: u64,
}

/// A parsed chunk payload.
#[derive(Clone, Debug)]
pub enum Chunk {
    DataSize64(DataSize64Chunk),
    Format(FormatInfoChunk),
    Axml(AxmlChunk),
    Chna(ChnaChunk),
    Data(DataChunk),
    Unknown(UnknownChunk),
}

/// 64-bit size overrides carried by BW64/RF64 files.
///
/// The table preserves file order; lookups are by chunk id.
#[derive(Clone, Debug)]
pub struct DataSize64Chunk {
    pub bw64_size: u64,
    pub data_size: u64,
    pub dummy: u64,
    pub table: Vec<(FourCc, u64)>,
}

impl DataSize64Chunk {
    /// Table lookup for chunk ids other than the file header and `data`.
    pub fn chunk_size(&self, id: FourCc) -> Option<u64> {
        self.table.iter().find(|(key, _)| *key == id).map(|(_, size)| *size)
    }
}

/// The `fmt ` chunk. Stored fields have already been validated against the
/// derived invariants by the parser, so the two always agree.
#[derive(Clone, Debug)]
pub struct FormatInfoChunk {
    pub format_tag: u16,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub bytes_per_second: u32,
    pub block_alignment: u16,
    pub bits_per_sample: u16,
    pub extra_data: Option<ExtraData>,
}

/// Extension fields present when `cb_size == 22` (WAVE_FORMAT_EXTENSIBLE).
#[derive(Clone, Debug)]
pub struct ExtraData {
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    pub sub_format: u16,
    pub sub_format_string: [u8; 14],
}

/// Opaque ADM metadata payload.
#[derive(Clone, Debug)]
pub struct AxmlChunk {
    pub data: Vec<u8>,
}

/// One track mapping row of a `chna` chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioId {
    pub track_index: u16,
    pub uid: [u8; 12],
    pub track_ref: [u8; 14],
    pub pack_ref: [u8; 11],
}

/// Channel allocation metadata.
#[derive(Clone, Debug)]
pub struct ChnaChunk {
    pub audio_ids: Vec<AudioId>,
}

impl ChnaChunk {
    pub fn num_uids(&self) -> usize {
        self.audio_ids.len()
    }

    /// Number of distinct tracks referenced by the audio ids.
    pub fn num_tracks(&self) -> usize {
        let mut tracks: Vec<u16> = self.audio_ids.iter().map(|id| id.track_index).collect();
        tracks.sort_unstable();
        tracks.dedup();
        tracks.len()
    }
}

/// The `data` chunk. Only the size is recorded; sample payloads are read on
/// demand by the reader facade.
#[derive(Clone, Copy, Debug)]
pub struct DataChunk {
    pub size: u64,
}

/// Any chunk the parser has no dedicated model for; carried verbatim.
#[derive(Clone, Debug)]
pub struct UnknownChunk {
    pub id: FourCc,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn id(&self) -> FourCc {
        match self {
            Chunk::DataSize64(_) => super::io::DS64,
            Chunk::Format(_) => super::io::FMT,
            Chunk::Axml(_) => super::io::AXML,
            Chunk::Chna(_) => super::io::CHNA,
            Chunk::Data(_) => super::io::DATA,
            Chunk::Unknown(chunk) => chunk.id,
        }
    }
}
