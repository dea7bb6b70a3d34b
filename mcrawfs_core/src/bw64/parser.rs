//! Payload parsers for the individual chunk types.
//!
//! Each parser assumes the stream has been rebased to the first payload byte
//! (`position + 8`) and consumes exactly the chunk's payload. Any short
//! read, illegal size or failed sanity check is fatal for the whole file;
//! there is no partial acceptance.

use std::io::{Read, Seek, SeekFrom};

use super::chunks::{
    AudioId, AxmlChunk, ChnaChunk, Chunk, ChunkHeader, DataChunk, DataSize64Chunk, ExtraData,
    FormatInfoChunk, UnknownChunk,
};
use super::io::{
    self, read_exact_chunk, read_four_cc, read_u16, read_u32, read_u64, safe_add, safe_cast,
};
use super::Bw64Error;

fn parse_extra_data<R: Read>(stream: &mut R) -> Result<ExtraData, Bw64Error> {
    let valid_bits_per_sample = read_u16(stream)?;
    let channel_mask = read_u32(stream)?;
    let sub_format = read_u16(stream)?;
    let mut sub_format_string = [0u8; 14];
    read_exact_chunk(stream, &mut sub_format_string)?;
    Ok(ExtraData {
        valid_bits_per_sample,
        channel_mask,
        sub_format,
        sub_format_string,
    })
}

pub(super) fn parse_format_chunk<R: Read>(
    stream: &mut R,
    size: u64,
) -> Result<FormatInfoChunk, Bw64Error> {
    if size != 16 && size != 18 && size != 40 {
        return Err(Bw64Error::InvalidFormat(format!(
            "illegal 'fmt ' chunk size: {size}"
        )));
    }

    let format_tag = read_u16(stream)?;
    let channel_count = read_u16(stream)?;
    let sample_rate = read_u32(stream)?;
    let bytes_per_second = read_u32(stream)?;
    let block_alignment = read_u16(stream)?;
    let bits_per_sample = read_u16(stream)?;

    let cb_size = if size > 16 { read_u16(stream)? } else { 0 };
    let extra_data = if size > 18 && cb_size > 0 {
        Some(parse_extra_data(stream)?)
    } else {
        None
    };

    if cb_size != 0 && cb_size != 22 {
        return Err(Bw64Error::InvalidFormat(format!(
            "unsupported 'fmt ' extension size: {cb_size}"
        )));
    }
    if format_tag != 1 && format_tag != 0xfffe {
        return Err(Bw64Error::UnsupportedFormatTag(format_tag));
    }
    if format_tag == 0xfffe {
        match &extra_data {
            None => {
                return Err(Bw64Error::InvalidFormat(
                    "missing extra data for WAVE_FORMAT_EXTENSIBLE".into(),
                ))
            }
            Some(extra) if extra.sub_format != 1 => {
                return Err(Bw64Error::InvalidFormat(format!(
                    "unsupported subformat: {}",
                    extra.sub_format
                )))
            }
            Some(_) => {}
        }
    }

    let derived_alignment = u32::from(channel_count) * u32::from(bits_per_sample) / 8;
    if derived_alignment == 0 {
        return Err(Bw64Error::InvalidFormat(
            "zero block alignment".into(),
        ));
    }
    if u32::from(block_alignment) != derived_alignment {
        return Err(Bw64Error::SanityCheckFailed {
            field: "blockAlignment",
            stored: u64::from(block_alignment),
            derived: u64::from(derived_alignment),
        });
    }
    let derived_bytes_per_second = sample_rate
        .checked_mul(derived_alignment)
        .ok_or(Bw64Error::Overflow)?;
    if bytes_per_second != derived_bytes_per_second {
        return Err(Bw64Error::SanityCheckFailed {
            field: "bytesPerSecond",
            stored: u64::from(bytes_per_second),
            derived: u64::from(derived_bytes_per_second),
        });
    }

    Ok(FormatInfoChunk {
        format_tag,
        channel_count,
        sample_rate,
        bytes_per_second,
        block_alignment,
        bits_per_sample,
        extra_data,
    })
}

pub(super) fn parse_axml_chunk<R: Read>(stream: &mut R, size: u64) -> Result<AxmlChunk, Bw64Error> {
    let mut data = vec![0u8; safe_cast::<usize, u64>(size)?];
    read_exact_chunk(stream, &mut data)?;
    Ok(AxmlChunk { data })
}

fn parse_audio_id<R: Read + Seek>(stream: &mut R) -> Result<AudioId, Bw64Error> {
    let track_index = read_u16(stream)?;
    let mut uid = [0u8; 12];
    read_exact_chunk(stream, &mut uid)?;
    let mut track_ref = [0u8; 14];
    read_exact_chunk(stream, &mut track_ref)?;
    let mut pack_ref = [0u8; 11];
    read_exact_chunk(stream, &mut pack_ref)?;
    stream.seek(SeekFrom::Current(1)).map_err(Bw64Error::Io)?; // skip padding
    Ok(AudioId {
        track_index,
        uid,
        track_ref,
        pack_ref,
    })
}

pub(super) fn parse_chna_chunk<R: Read + Seek>(
    stream: &mut R,
    size: u64,
) -> Result<ChnaChunk, Bw64Error> {
    if size < 4 {
        return Err(Bw64Error::InvalidFormat(format!(
            "illegal 'chna' chunk size: {size}"
        )));
    }

    let num_tracks = read_u16(stream)?;
    let num_uids = read_u16(stream)?;

    const AUDIO_ID_LEN: u64 = 40;
    let required = safe_add(4, u64::from(num_uids) * AUDIO_ID_LEN)?;
    if required > size {
        return Err(Bw64Error::InvalidFormat(format!(
            "'chna' chunk too short for {num_uids} audio ids"
        )));
    }

    let mut audio_ids = Vec::with_capacity(usize::from(num_uids));
    for _ in 0..num_uids {
        audio_ids.push(parse_audio_id(stream)?);
    }

    let chunk = ChnaChunk { audio_ids };
    if chunk.num_tracks() != usize::from(num_tracks) {
        return Err(Bw64Error::SanityCheckFailed {
            field: "chna numTracks",
            stored: u64::from(num_tracks),
            derived: chunk.num_tracks() as u64,
        });
    }
    Ok(chunk)
}

pub(super) fn parse_ds64_chunk<R: Read + Seek>(
    stream: &mut R,
    size: u64,
) -> Result<DataSize64Chunk, Bw64Error> {
    // Fixed-size head, tableLength entries, then optional junk.
    const HEADER_LEN: u64 = 28;
    const TABLE_ENTRY_LEN: u64 = 12;

    if size < HEADER_LEN {
        return Err(Bw64Error::InvalidFormat(format!(
            "illegal 'ds64' chunk size: {size}"
        )));
    }

    let bw64_size = read_u64(stream)?;
    let data_size = read_u64(stream)?;
    let dummy = read_u64(stream)?;
    let table_length = read_u32(stream)?;

    let table_len = u64::from(table_length)
        .checked_mul(TABLE_ENTRY_LEN)
        .ok_or(Bw64Error::Overflow)?;
    let min_size = safe_add(HEADER_LEN, table_len)?;
    if size < min_size {
        return Err(Bw64Error::InvalidFormat(
            "'ds64' chunk too short to hold its table entries".into(),
        ));
    }

    // tableLength is bounded only by the chunk size; grow while reading.
    let mut table = Vec::new();
    for _ in 0..table_length {
        let id = read_four_cc(stream)?;
        let chunk_size = read_u64(stream)?;
        table.push((id, chunk_size));
    }

    // skip junk data
    stream
        .seek(SeekFrom::Current(safe_cast::<i64, u64>(size - min_size)?))
        .map_err(Bw64Error::Io)?;

    Ok(DataSize64Chunk {
        bw64_size,
        data_size,
        dummy,
        table,
    })
}

fn parse_unknown_chunk<R: Read>(
    stream: &mut R,
    id: super::io::FourCc,
    size: u64,
) -> Result<UnknownChunk, Bw64Error> {
    let mut data = vec![0u8; safe_cast::<usize, u64>(size)?];
    read_exact_chunk(stream, &mut data)?;
    Ok(UnknownChunk { id, data })
}

/// Rebase the stream to the chunk payload and dispatch to the parser for its
/// id. `ds64` is handled separately during header setup and never reaches
/// this function.
pub(super) fn parse_chunk<R: Read + Seek>(
    stream: &mut R,
    header: &ChunkHeader,
) -> Result<Chunk, Bw64Error> {
    stream
        .seek(SeekFrom::Start(safe_add(header.position, 8)?))
        .map_err(Bw64Error::Io)?;

    match header.id {
        io::FMT => Ok(Chunk::Format(parse_format_chunk(stream, header.size)?)),
        io::AXML => Ok(Chunk::Axml(parse_axml_chunk(stream, header.size)?)),
        io::CHNA => Ok(Chunk::Chna(parse_chna_chunk(stream, header.size)?)),
        io::DATA => Ok(Chunk::Data(DataChunk { size: header.size })),
        id => Ok(Chunk::Unknown(parse_unknown_chunk(stream, id, header.size)?)),
    }
}
