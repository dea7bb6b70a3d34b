use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::tempdir;

use mcrawfs_core::bw64::Bw64Reader;
use mcrawfs_core::{
    AudioChunk, Decoder, DngEncoder, Entry, EntrySource, McrawFileSystem, MountConfig,
    ReadDispatch, RenderOptions, Timestamp, VfsError, VirtualFileSystem,
};

/// Recording fixtures are serialized to JSON on disk so the decoder can be
/// reopened from its path alone, the same way a real container decoder
/// would be. No binary assets are committed; every test synthesizes its
/// recording at runtime.
#[derive(Clone, Serialize, Deserialize)]
struct Recording {
    frames: Vec<Timestamp>,
    sample_rate: u32,
    channels: u16,
    audio: Vec<RecordedChunk>,
    frame_payload: usize,
}

#[derive(Clone, Serialize, Deserialize)]
struct RecordedChunk {
    timestamp: Timestamp,
    samples: Vec<i16>,
}

impl Recording {
    fn video_only(frames: Vec<Timestamp>) -> Self {
        Self {
            frames,
            sample_rate: 48_000,
            channels: 2,
            audio: Vec::new(),
            frame_payload: 96,
        }
    }

    fn write_to(&self, dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let json = serde_json::to_vec(self).expect("serialize recording");
        std::fs::write(&path, json).expect("write recording");
        path
    }
}

struct JsonDecoder {
    recording: Recording,
}

impl Decoder for JsonDecoder {
    fn open(path: &Path) -> Result<Self, VfsError> {
        let bytes = std::fs::read(path)?;
        let recording =
            serde_json::from_slice(&bytes).map_err(|err| VfsError::Decoder(err.to_string()))?;
        Ok(Self { recording })
    }

    fn frames(&self) -> Result<Vec<Timestamp>, VfsError> {
        Ok(self.recording.frames.clone())
    }

    fn load_frame(&mut self, timestamp: Timestamp) -> Result<(Vec<u8>, Value), VfsError> {
        if !self.recording.frames.contains(&timestamp) {
            return Err(VfsError::FrameNotFound(timestamp));
        }
        let raw = vec![(timestamp % 251) as u8; self.recording.frame_payload];
        Ok((raw, serde_json::json!({ "timestamp": timestamp })))
    }

    fn load_audio(&mut self) -> Result<Vec<AudioChunk>, VfsError> {
        Ok(self
            .recording
            .audio
            .iter()
            .map(|chunk| AudioChunk {
                timestamp: chunk.timestamp,
                samples: chunk.samples.clone(),
            })
            .collect())
    }

    fn audio_sample_rate_hz(&self) -> u32 {
        self.recording.sample_rate
    }

    fn num_audio_channels(&self) -> u16 {
        self.recording.channels
    }

    fn container_metadata(&self) -> Result<Value, VfsError> {
        Ok(serde_json::json!({ "camera": "synthetic", "frames": self.recording.frames.len() }))
    }
}

/// Produces deterministic fixed-size pseudo-DNGs: the advertised entry
/// size must hold for every frame, so the length depends only on the
/// options and scale.
struct StubDngEncoder {
    base_size: u64,
}

impl DngEncoder for StubDngEncoder {
    fn generate_dng(
        &self,
        raw: &[u8],
        frame_metadata: &Value,
        _container_metadata: &Value,
        _fps: f64,
        frame_index: usize,
        _options: RenderOptions,
        scale: u32,
    ) -> Result<Vec<u8>, VfsError> {
        let timestamp = frame_metadata["timestamp"].as_i64().unwrap_or(-1);
        let mut out = vec![0u8; (self.base_size / u64::from(scale)) as usize];
        out[0] = frame_index as u8;
        out[1] = raw.first().copied().unwrap_or(0);
        out[2] = (timestamp % 251) as u8;
        Ok(out)
    }
}

type Fs = McrawFileSystem<JsonDecoder, StubDngEncoder>;

fn small_pools(config: mcrawfs_core::MountConfigBuilder) -> mcrawfs_core::MountConfigBuilder {
    config
        .io_threads(NonZeroUsize::new(2).expect("non-zero"))
        .processing_threads(NonZeroUsize::new(2).expect("non-zero"))
}

fn open_fs(recording: &Recording) -> (tempfile::TempDir, Fs) {
    let dir = tempdir().expect("create temp dir");
    let path = recording.write_to(dir.path(), "clip.mcraw");
    let config = small_pools(MountConfig::builder(&path))
        .build()
        .expect("mount config");
    let fs = Fs::new(config, StubDngEncoder { base_size: 3_000 }).expect("open filesystem");
    (dir, fs)
}

fn frame_entries(fs: &Fs) -> Vec<Entry> {
    fs.list_files(Some(".dng"))
}

#[test]
fn entry_list_is_ordered_and_deterministic() {
    let frames: Vec<Timestamp> = (0..10).map(|n| n * 40_000_000).collect();
    let mut recording = Recording::video_only(frames);
    recording.audio = vec![RecordedChunk {
        timestamp: 0,
        samples: vec![100; 9_600],
    }];
    let (_dir, fs) = open_fs(&recording);

    let entries = fs.list_files(None);
    assert_eq!(entries[0].name, "audio.wav");
    assert_eq!(entries[0].source, EntrySource::Audio);
    assert_eq!(entries.len(), 11);
    for (index, entry) in entries[1..].iter().enumerate() {
        assert_eq!(entry.name, format!("frame-{index:06}.dng"));
        assert_eq!(entry.size, fs.typical_dng_size());
        assert_eq!(entry.kind, mcrawfs_core::EntryKind::File);
    }
    assert!((fs.fps() - 25.0).abs() < 1e-9);

    let again = fs.list_files(None);
    assert_eq!(entries, again);
}

#[test]
fn empty_recording_yields_empty_listing() {
    let recording = Recording::video_only(Vec::new());
    let (_dir, fs) = open_fs(&recording);
    assert!(fs.list_files(None).is_empty());
    assert_eq!(fs.typical_dng_size(), 0);
}

#[test]
fn list_files_filter_is_a_substring_match() {
    let mut recording = Recording::video_only(vec![0, 40_000_000]);
    recording.audio = vec![RecordedChunk {
        timestamp: 0,
        samples: vec![1; 960],
    }];
    let (_dir, fs) = open_fs(&recording);

    assert_eq!(fs.list_files(Some("audio")).len(), 1);
    assert_eq!(fs.list_files(Some(".dng")).len(), 2);
    assert_eq!(fs.list_files(Some("000001")).len(), 1);
    assert!(fs.list_files(Some("nope")).is_empty());
    assert_eq!(fs.list_files(Some("")).len(), 3);
}

#[test]
fn find_entry_matches_full_paths() {
    let recording = Recording::video_only(vec![0, 40_000_000, 80_000_000]);
    let (_dir, fs) = open_fs(&recording);

    let entry = fs.find_entry("/frame-000001.dng").expect("entry found");
    assert_eq!(entry.name, "frame-000001.dng");
    assert!(fs.find_entry("frame-000002.dng").is_some());
    assert!(fs.find_entry("/frame-000009.dng").is_none());
    assert!(fs.find_entry("/FRAME-000001.DNG").is_none());
}

#[test]
fn audio_reads_are_synchronous_slices() {
    let mut recording = Recording::video_only(vec![0, 40_000_000]);
    recording.audio = vec![RecordedChunk {
        timestamp: 0,
        samples: (0..4_800).map(|n| n as i16).collect(),
    }];
    let (_dir, fs) = open_fs(&recording);

    let entry = fs.find_entry("audio.wav").expect("audio entry");
    let whole = match fs.read_file(
        &entry,
        RenderOptions::NONE,
        0,
        entry.size as usize,
        Box::new(|_| panic!("sync read must not call back")),
    ) {
        ReadDispatch::Sync(bytes) => bytes,
        ReadDispatch::Queued => panic!("audio read should be synchronous"),
    };
    assert_eq!(whole.len() as u64, entry.size);

    let tail = match fs.read_file(
        &entry,
        RenderOptions::NONE,
        100,
        64,
        Box::new(|_| panic!("sync read must not call back")),
    ) {
        ReadDispatch::Sync(bytes) => bytes,
        ReadDispatch::Queued => panic!("audio read should be synchronous"),
    };
    assert_eq!(tail, whole[100..164]);

    // The projected audio is itself a valid WAV file.
    let mut reader = Bw64Reader::new(Cursor::new(whole)).expect("parse projected audio");
    assert_eq!(reader.channels(), 2);
    assert_eq!(reader.sample_rate(), 48_000);
    assert_eq!(reader.number_of_frames(), 2_400);
    let mut decoded = vec![0.0f32; 4_800];
    assert_eq!(reader.read(&mut decoded).expect("decode"), 2_400);
}

#[test]
fn late_audio_loses_its_head_in_the_projection() {
    // Audio starts 50 ms after the first frame: 2400 stereo frames are
    // trimmed, so 7200 recorded frames surface as 4800.
    let mut recording = Recording::video_only(vec![0, 40_000_000, 80_000_000]);
    recording.audio = vec![RecordedChunk {
        timestamp: 50_000_000,
        samples: vec![42; 14_400],
    }];
    let (_dir, fs) = open_fs(&recording);

    let entry = fs.find_entry("audio.wav").expect("audio entry");
    let bytes = match fs.read_file(
        &entry,
        RenderOptions::NONE,
        0,
        entry.size as usize,
        Box::new(|_| ()),
    ) {
        ReadDispatch::Sync(bytes) => bytes,
        ReadDispatch::Queued => panic!("audio read should be synchronous"),
    };
    let reader = Bw64Reader::new(Cursor::new(bytes)).expect("parse projected audio");
    assert_eq!(reader.number_of_frames(), 4_800);
}

#[test]
fn frame_read_delivers_sliced_bytes_through_callback() {
    let recording = Recording::video_only(vec![0, 40_000_000, 80_000_000]);
    let (_dir, fs) = open_fs(&recording);
    assert_eq!(fs.typical_dng_size(), 3_000);

    let entry = fs.find_entry("frame-000001.dng").expect("frame entry");
    let (sender, receiver) = mpsc::channel();
    let dispatch = fs.read_file(
        &entry,
        RenderOptions::NONE,
        1_024,
        2_048,
        Box::new(move |result| sender.send(result).expect("deliver result")),
    );
    assert!(matches!(dispatch, ReadDispatch::Queued));

    let result = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("callback fired");
    let bytes = result.expect("read succeeded");
    assert_eq!(bytes.len(), 1_976);
}

#[test]
fn concurrent_frame_reads_all_complete() {
    // More in-flight reads than pool workers: every request still gets
    // exactly one callback and full-length bytes.
    let frames: Vec<Timestamp> = (0..16).map(|n| n * 40_000_000).collect();
    let recording = Recording::video_only(frames.clone());
    let (_dir, fs) = open_fs(&recording);

    let (sender, receiver) = mpsc::channel();
    for index in 0..frames.len() {
        let entry = fs
            .find_entry(&format!("frame-{index:06}.dng"))
            .expect("frame entry");
        let sender = sender.clone();
        let dispatch = fs.read_file(
            &entry,
            RenderOptions::NONE,
            0,
            entry.size as usize,
            Box::new(move |result| sender.send((index, result)).expect("deliver result")),
        );
        assert!(matches!(dispatch, ReadDispatch::Queued));
    }
    drop(sender);

    let mut seen = vec![false; frames.len()];
    let mut total_bytes = 0u64;
    for _ in 0..frames.len() {
        let (index, result) = receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("callback fired");
        assert!(!seen[index], "duplicate callback for frame {index}");
        seen[index] = true;
        let bytes = result.expect("read succeeded");
        assert_eq!(bytes[0] as usize, index);
        total_bytes += bytes.len() as u64;
    }
    assert!(seen.iter().all(|&done| done));
    assert_eq!(total_bytes, frames.len() as u64 * fs.typical_dng_size());
    assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn unknown_frame_timestamp_fails_through_callback() {
    let recording = Recording::video_only(vec![0, 40_000_000]);
    let (_dir, fs) = open_fs(&recording);

    // An entry whose timestamp the recording does not contain; the
    // pipeline must report the failure instead of poisoning anything.
    let bogus = Entry {
        kind: mcrawfs_core::EntryKind::File,
        name: "frame-000099.dng".to_string(),
        size: fs.typical_dng_size(),
        source: EntrySource::Frame(999_999_999),
    };
    let (sender, receiver) = mpsc::channel();
    fs.read_file(
        &bogus,
        RenderOptions::NONE,
        0,
        64,
        Box::new(move |result| sender.send(result).expect("deliver result")),
    );

    let result = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("callback fired");
    match result {
        Err(VfsError::FrameNotFound(999_999_999)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // A well-formed read still works afterwards.
    let entry = fs.find_entry("frame-000000.dng").expect("frame entry");
    let (sender, receiver) = mpsc::channel();
    fs.read_file(
        &entry,
        RenderOptions::NONE,
        0,
        16,
        Box::new(move |result| sender.send(result).expect("deliver result")),
    );
    let bytes = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("callback fired")
        .expect("read succeeded");
    assert_eq!(bytes.len(), 16);
}

#[test]
fn update_options_rebuilds_the_entry_list() {
    let recording = Recording::video_only(vec![0, 40_000_000, 80_000_000]);
    let dir = tempdir().expect("create temp dir");
    let path = recording.write_to(dir.path(), "clip.mcraw");
    let config = small_pools(MountConfig::builder(&path))
        .draft_scale(4)
        .build()
        .expect("mount config");
    let mut fs = Fs::new(config, StubDngEncoder { base_size: 3_000 }).expect("open filesystem");
    assert_eq!(fs.typical_dng_size(), 3_000);

    fs.update_options(RenderOptions::DRAFT, 4)
        .expect("rebuild with draft options");
    assert_eq!(fs.typical_dng_size(), 750);
    for entry in frame_entries(&fs) {
        assert_eq!(entry.size, 750);
    }

    fs.update_options(RenderOptions::NONE, 4)
        .expect("rebuild without draft options");
    assert_eq!(fs.typical_dng_size(), 3_000);
}

#[test]
fn missing_recording_fails_at_open() {
    let dir = tempdir().expect("create temp dir");
    match MountConfig::new(dir.path().join("missing.mcraw")) {
        Err(VfsError::InvalidPath(_)) => {}
        other => panic!("unexpected result: {:?}", other.err()),
    }
}

#[test]
fn corrupt_recording_fails_at_open() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("broken.mcraw");
    std::fs::write(&path, b"not a recording").expect("write file");

    let config = small_pools(MountConfig::builder(&path))
        .build()
        .expect("mount config");
    match Fs::new(config, StubDngEncoder { base_size: 3_000 }) {
        Err(VfsError::Decoder(_)) => {}
        Ok(_) => panic!("corrupt recording must not open"),
        Err(other) => panic!("unexpected error: {other:?}"),
    }
}
