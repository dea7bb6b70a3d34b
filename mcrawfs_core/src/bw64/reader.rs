//! Reader facade over a parsed RIFF/BW64/RF64 file.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::chunks::{
    AxmlChunk, ChnaChunk, Chunk, ChunkHeader, DataSize64Chunk, FormatInfoChunk,
};
use super::io::{
    self, decode_pcm_samples, read_four_cc, read_u32, safe_add, FourCc, Sample,
};
use super::parser;
use super::Bw64Error;

/// A BW64/RF64/RIFF WAVE file opened for reading.
///
/// Construction parses the full chunk layout up front: the RIFF header, the
/// mandatory `ds64` chunk for 64-bit files, every chunk header (validated
/// against the end of the file, pad bytes included) and every known payload.
/// Any inconsistency fails the whole file. After construction the reader is
/// positioned at frame 0 of the `data` chunk and sample access is
/// frame-addressed.
pub struct Bw64Reader<R> {
    stream: R,
    file_format: FourCc,
    file_size: u32,
    chunk_headers: Vec<ChunkHeader>,
    chunks: Vec<Chunk>,
    fmt: FormatInfoChunk,
    data: ChunkHeader,
}

impl Bw64Reader<BufReader<File>> {
    /// Open and parse a WAV file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Bw64Error> {
        let file = File::open(path).map_err(Bw64Error::Io)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> Bw64Reader<R> {
    /// Parse the stream and build the chunk table.
    pub fn new(mut stream: R) -> Result<Self, Bw64Error> {
        let (file_format, file_size) = read_riff_header(&mut stream)?;

        let mut chunk_headers = Vec::new();
        let mut ds64 = None;

        if file_format == io::BW64 || file_format == io::RF64 {
            // The first chunk of a 64-bit file must be ds64; every later
            // size lookup depends on it.
            let position = stream.stream_position().map_err(Bw64Error::Io)?;
            let id = read_four_cc(&mut stream)?;
            let size = u64::from(read_u32(&mut stream)?);
            if id != io::DS64 {
                return Err(Bw64Error::MissingDs64(file_format));
            }
            let chunk = parser::parse_ds64_chunk(&mut stream, size)?;
            let padded_end = safe_add(safe_add(position, 8)?, padded(size)?)?;
            stream
                .seek(SeekFrom::Start(padded_end))
                .map_err(Bw64Error::Io)?;
            chunk_headers.push(ChunkHeader { id, size, position });
            ds64 = Some(chunk);
        }

        walk_chunk_headers(&mut stream, ds64.as_ref(), &mut chunk_headers)?;

        let mut chunks = Vec::with_capacity(chunk_headers.len());
        if let Some(chunk) = ds64 {
            chunks.push(Chunk::DataSize64(chunk));
        }
        for header in &chunk_headers {
            if header.id == io::DS64 {
                continue;
            }
            chunks.push(parser::parse_chunk(&mut stream, header)?);
        }

        let fmt = chunks
            .iter()
            .find_map(|chunk| match chunk {
                Chunk::Format(fmt) => Some(fmt.clone()),
                _ => None,
            })
            .ok_or(Bw64Error::MissingMandatoryChunk(io::FMT))?;
        let data = chunk_headers
            .iter()
            .find(|header| header.id == io::DATA)
            .copied()
            .ok_or(Bw64Error::MissingMandatoryChunk(io::DATA))?;

        let mut reader = Self {
            stream,
            file_format,
            file_size,
            chunk_headers,
            chunks,
            fmt,
            data,
        };
        reader.seek(SeekFrom::Start(0))?;
        Ok(reader)
    }

    /// File format tag: `RIFF`, `BW64` or `RF64`.
    pub fn file_format(&self) -> FourCc {
        self.file_format
    }

    /// The 32-bit size field of the file header (not overridden by `ds64`).
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn format_tag(&self) -> u16 {
        self.fmt.format_tag
    }

    pub fn channels(&self) -> u16 {
        self.fmt.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.fmt.sample_rate
    }

    pub fn bit_depth(&self) -> u16 {
        self.fmt.bits_per_sample
    }

    /// Bytes per sample frame across all channels.
    pub fn block_alignment(&self) -> u16 {
        self.fmt.block_alignment
    }

    /// Number of sample frames in the `data` chunk.
    pub fn number_of_frames(&self) -> u64 {
        self.data.size / u64::from(self.block_alignment())
    }

    /// Headers of every chunk present in the file, in file order.
    pub fn chunk_headers(&self) -> &[ChunkHeader] {
        &self.chunk_headers
    }

    pub fn has_chunk(&self, id: FourCc) -> bool {
        self.chunk_headers.iter().any(|header| header.id == id)
    }

    pub fn format_chunk(&self) -> &FormatInfoChunk {
        &self.fmt
    }

    pub fn ds64_chunk(&self) -> Option<&DataSize64Chunk> {
        self.chunks.iter().find_map(|chunk| match chunk {
            Chunk::DataSize64(ds64) => Some(ds64),
            _ => None,
        })
    }

    pub fn axml_chunk(&self) -> Option<&AxmlChunk> {
        self.chunks.iter().find_map(|chunk| match chunk {
            Chunk::Axml(axml) => Some(axml),
            _ => None,
        })
    }

    pub fn chna_chunk(&self) -> Option<&ChnaChunk> {
        self.chunks.iter().find_map(|chunk| match chunk {
            Chunk::Chna(chna) => Some(chna),
            _ => None,
        })
    }

    /// Seek to a frame position inside the `data` chunk.
    ///
    /// The target is clamped to `[0, number_of_frames]`; the clamped frame
    /// index is returned.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, Bw64Error> {
        let total = self.number_of_frames();
        let target = match pos {
            SeekFrom::Start(frame) => i128::from(frame),
            SeekFrom::Current(offset) => i128::from(self.tell()?) + i128::from(offset),
            SeekFrom::End(offset) => i128::from(total) + i128::from(offset),
        };
        let frame = target.clamp(0, i128::from(total)) as u64;

        let byte = safe_add(
            safe_add(self.data.position, 8)?,
            frame
                .checked_mul(u64::from(self.block_alignment()))
                .ok_or(Bw64Error::Overflow)?,
        )?;
        self.stream
            .seek(SeekFrom::Start(byte))
            .map_err(Bw64Error::Io)?;
        Ok(frame)
    }

    /// Read sample frames into `out`, decoding to normalized floats.
    ///
    /// `out` holds interleaved samples; `out.len() / channels` frames are
    /// requested, clamped to the frames remaining in the `data` chunk.
    /// Returns the number of frames read.
    pub fn read<S: Sample>(&mut self, out: &mut [S]) -> Result<usize, Bw64Error> {
        let channels = usize::from(self.channels());
        let remaining = self.number_of_frames().saturating_sub(self.tell()?);
        let frames = u64::min((out.len() / channels) as u64, remaining) as usize;
        if frames == 0 {
            return Ok(0);
        }

        let mut raw = vec![0u8; frames * usize::from(self.block_alignment())];
        self.stream.read_exact(&mut raw).map_err(io::map_read_err)?;
        decode_pcm_samples(
            &raw,
            &mut out[..frames * channels],
            self.fmt.bits_per_sample,
        )?;
        Ok(frames)
    }

    /// Current frame position inside the `data` chunk.
    pub fn tell(&mut self) -> Result<u64, Bw64Error> {
        let pos = self.stream.stream_position().map_err(Bw64Error::Io)?;
        let data_start = safe_add(self.data.position, 8)?;
        if pos < data_start {
            return Err(Bw64Error::Underflow);
        }
        Ok((pos - data_start) / u64::from(self.block_alignment()))
    }

    /// Whether the read position has reached the end of the `data` chunk.
    pub fn eof(&mut self) -> Result<bool, Bw64Error> {
        Ok(self.tell()? == self.number_of_frames())
    }
}

fn read_riff_header<R: Read>(stream: &mut R) -> Result<(FourCc, u32), Bw64Error> {
    let file_format = read_four_cc(stream)?;
    let file_size = read_u32(stream)?;
    let riff_type = read_four_cc(stream)?;

    if file_format != io::RIFF && file_format != io::BW64 && file_format != io::RF64 {
        return Err(Bw64Error::InvalidFormat(
            "not a RIFF, BW64 or RF64 file".into(),
        ));
    }
    if riff_type != io::WAVE {
        return Err(Bw64Error::InvalidFormat("not a WAVE file".into()));
    }
    Ok((file_format, file_size))
}

fn padded(size: u64) -> Result<u64, Bw64Error> {
    safe_add(size, size % 2)
}

/// Walk the remaining chunk headers, applying `ds64` size overrides and
/// enforcing that every chunk, pad byte included, ends inside the file.
fn walk_chunk_headers<R: Read + Seek>(
    stream: &mut R,
    ds64: Option<&DataSize64Chunk>,
    headers: &mut Vec<ChunkHeader>,
) -> Result<(), Bw64Error> {
    let start = stream.stream_position().map_err(Bw64Error::Io)?;
    let end = stream.seek(SeekFrom::End(0)).map_err(Bw64Error::Io)?;
    stream.seek(SeekFrom::Start(start)).map_err(Bw64Error::Io)?;

    loop {
        let position = stream.stream_position().map_err(Bw64Error::Io)?;
        if safe_add(position, 8)? > end {
            break;
        }

        let id = read_four_cc(stream)?;
        let size32 = read_u32(stream)?;
        let size = resolve_chunk_size(ds64, id, size32);

        let chunk_end = safe_add(safe_add(position, 8)?, padded(size)?)?;
        if chunk_end > end {
            return Err(Bw64Error::TruncatedChunk { id, position });
        }

        stream
            .seek(SeekFrom::Start(chunk_end))
            .map_err(Bw64Error::Io)?;
        headers.push(ChunkHeader { id, size, position });
    }
    Ok(())
}

/// The ds64 override order: the file header size, then `data`, then the
/// lookup table, and finally the plain 32-bit field.
fn resolve_chunk_size(ds64: Option<&DataSize64Chunk>, id: FourCc, size32: u32) -> u64 {
    if let Some(ds64) = ds64 {
        if id == io::BW64 || id == io::RF64 {
            return ds64.bw64_size;
        }
        if id == io::DATA {
            return ds64.data_size;
        }
        if let Some(size) = ds64.chunk_size(id) {
            return size;
        }
    }
    u64::from(size32)
}
