//! Read-on-demand projection of MCRAW camera recordings.
//!
//! An MCRAW recording holds a sequence of raw sensor frames with per-frame
//! metadata plus an interleaved audio track. This crate exposes such a
//! recording as a flat directory of ordinary files (one DNG per video
//! frame and a single `audio.wav`) without ever materializing the
//! expansion: [`McrawFileSystem`] publishes an entry list up front and
//! synthesizes file bytes lazily when a host asks for a byte range.
//!
//! The engine is generic over its two heavyweight collaborators. A
//! [`Decoder`] opens the container and hands out frame payloads and audio
//! chunks; a [`DngEncoder`] turns one raw frame into DNG bytes. Hosts such
//! as FUSE or Dokan shims consume the [`VirtualFileSystem`] trait.
//!
//! Frame reads are served by a two-stage pipeline: a small IO pool decodes
//! container frames (each worker keeps its own decoder, so container
//! handles are never shared across threads) and a CPU-sized processing
//! pool runs the DNG encode before slicing out the requested range. The
//! public read entry point never blocks on either stage.
//!
//! The [`bw64`] module is an independent subsystem: a strict, bit-exact
//! reader and writer for RIFF/BW64/RF64 WAVE files used for the projected
//! audio track.

#![forbid(unsafe_code)]

pub mod bw64;

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, error};
use serde_json::Value;
use thiserror::Error;

use bw64::{AudioWriter, Bw64Error};

/// Nanoseconds since an arbitrary epoch chosen by the container.
pub type Timestamp = i64;

/// Number of workers dedicated to container decoding.
const IO_THREADS: usize = 4;
/// Downsampling factor applied when [`RenderOptions::DRAFT`] is set and no
/// other scale was configured.
const DEFAULT_DRAFT_SCALE: u32 = 2;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

#[cfg(windows)]
const DESKTOP_INI: &str = "[.ShellClassInfo]\r\n\
ConfirmFileOp=0\r\n\
\r\n\
[ViewState]\r\n\
Mode=4\r\n\
Vid={137E7700-3573-11CF-AE69-08002B2E1262}\r\n\
FolderType=Generic\r\n\
\r\n\
[{5984FFE0-28D4-11CF-AE66-08002B2E1262}]\r\n\
Mode=4\r\n\
LogicalViewMode=1\r\n\
IconSize=16\r\n\
\r\n\
[LocalizedFileNames]\r\n";

/// Errors surfaced by the virtual filesystem engine.
///
/// Failures during construction (or [`VirtualFileSystem::update_options`])
/// abort the rebuild and leave no filesystem behind. Failures inside the
/// asynchronous frame pipeline are delivered through the read callback
/// instead and never poison the entry list or other in-flight requests.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Wrapper around IO errors encountered while reading the recording.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapper around errors produced by the WAV layer while serializing
    /// or parsing the audio track.
    #[error(transparent)]
    Wav(#[from] Bw64Error),

    /// Error returned when the recording path cannot be resolved to an
    /// existing file.
    #[error("invalid recording path: {0}")]
    InvalidPath(PathBuf),

    /// Error produced by the container decoder while opening or reading
    /// the recording.
    #[error("decoder error: {0}")]
    Decoder(String),

    /// Error returned when an entry's timestamp is absent from the
    /// recording's frame index.
    #[error("frame {0} not found in recording")]
    FrameNotFound(Timestamp),

    /// Error produced by the DNG encoder while rendering a frame.
    #[error("DNG encoding failed: {0}")]
    DngEncode(String),
}

/// Bit flags forwarded to the DNG encoder.
///
/// Only [`DRAFT`] is interpreted by the engine itself (it selects the
/// configured draft scale); every other bit passes through opaquely.
///
/// [`DRAFT`]: RenderOptions::DRAFT
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderOptions(u32);

impl RenderOptions {
    pub const NONE: RenderOptions = RenderOptions(0);
    /// Render downsampled draft-quality DNGs.
    pub const DRAFT: RenderOptions = RenderOptions(1);

    pub const fn from_bits(bits: u32) -> Self {
        RenderOptions(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: RenderOptions) -> bool {
        self.0 & other.0 == other.0
    }

    /// The downsampling factor these options imply.
    pub fn scale_factor(self, draft_scale: u32) -> u32 {
        if self.contains(Self::DRAFT) {
            draft_scale.max(1)
        } else {
            1
        }
    }
}

impl std::ops::BitOr for RenderOptions {
    type Output = RenderOptions;

    fn bitor(self, rhs: RenderOptions) -> RenderOptions {
        RenderOptions(self.0 | rhs.0)
    }
}

/// A run of interleaved 16-bit audio samples starting at `timestamp`
/// (nanoseconds, same epoch as the video frames).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioChunk {
    pub timestamp: Timestamp,
    pub samples: Vec<i16>,
}

/// What a published entry stands for inside the recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntrySource {
    /// A DNG frame decoded from the source frame with this timestamp.
    Frame(Timestamp),
    /// The synchronized audio track.
    Audio,
    /// Static metadata such as `desktop.ini`.
    Static,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One virtual file surfaced by the projector. Immutable once the entry
/// list has been built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub name: String,
    pub size: u64,
    pub source: EntrySource,
}

/// Completion callback for asynchronous reads: the sliced bytes on
/// success, the pipeline failure otherwise.
pub type ReadCallback = Box<dyn FnOnce(Result<Vec<u8>, VfsError>) + Send + 'static>;

/// How a read request was served.
#[derive(Debug)]
pub enum ReadDispatch {
    /// The bytes were produced synchronously; the callback was not used.
    Sync(Vec<u8>),
    /// The request was queued on the frame pipeline; the callback will
    /// receive the result.
    Queued,
}

/// Container decoder contract.
///
/// One decoder owns one open recording. Implementations do not need to be
/// thread-safe: the engine opens a separate decoder per pipeline worker
/// and never shares one across threads.
pub trait Decoder: Sized {
    fn open(path: &Path) -> Result<Self, VfsError>;

    /// Timestamps of every video frame, in container order.
    fn frames(&self) -> Result<Vec<Timestamp>, VfsError>;

    /// Raw payload and metadata of the frame at `timestamp`.
    fn load_frame(&mut self, timestamp: Timestamp) -> Result<(Vec<u8>, Value), VfsError>;

    /// The complete interleaved audio track, sorted by timestamp.
    fn load_audio(&mut self) -> Result<Vec<AudioChunk>, VfsError>;

    fn audio_sample_rate_hz(&self) -> u32;

    fn num_audio_channels(&self) -> u16;

    fn container_metadata(&self) -> Result<Value, VfsError>;
}

/// DNG encoder contract.
pub trait DngEncoder {
    /// Encode one raw frame into a complete DNG file.
    ///
    /// For a fixed set of options and scale the output length must be the
    /// same for every frame of a recording: the entry list advertises one
    /// probe-measured size for all DNG entries, and hosts compute read
    /// offsets from it before any frame is rendered.
    #[allow(clippy::too_many_arguments)]
    fn generate_dng(
        &self,
        raw: &[u8],
        frame_metadata: &Value,
        container_metadata: &Value,
        fps: f64,
        frame_index: usize,
        options: RenderOptions,
        scale: u32,
    ) -> Result<Vec<u8>, VfsError>;
}

/// The surface consumed by FUSE/Dokan-style host glue.
pub trait VirtualFileSystem {
    /// All published entries. `filter` is matched as a case-sensitive
    /// substring of the entry name; `None` (or an empty pattern) returns
    /// everything.
    fn list_files(&self, filter: Option<&str>) -> Vec<Entry>;

    /// Look up an entry by full path (leading separators are ignored;
    /// comparison is case-sensitive).
    fn find_entry(&self, path: &str) -> Option<Entry>;

    /// Serve `len` bytes of `entry` starting at byte `pos`.
    ///
    /// Static and audio entries are sliced synchronously and returned as
    /// [`ReadDispatch::Sync`]; `on_complete` is not invoked for them.
    /// Frame entries return [`ReadDispatch::Queued`] immediately and
    /// deliver their result through `on_complete` once the decode/encode
    /// pipeline finishes. Reads past the end of an entry yield empty
    /// slices; shorter-than-requested reads are clamped to the bytes
    /// available.
    fn read_file(
        &self,
        entry: &Entry,
        options: RenderOptions,
        pos: u64,
        len: usize,
        on_complete: ReadCallback,
    ) -> ReadDispatch;

    /// Rebuild the entry list for new render options.
    ///
    /// Taking `&mut self` makes the quiesce requirement structural: no
    /// read can run concurrently with a rebuild.
    fn update_options(&mut self, options: RenderOptions, draft_scale: u32)
        -> Result<(), VfsError>;
}

/// Validated configuration for opening a recording.
///
/// # Examples
///
/// ```no_run
/// use mcrawfs_core::{MountConfig, RenderOptions};
///
/// let config = MountConfig::builder("clip.mcraw")
///     .options(RenderOptions::DRAFT)
///     .draft_scale(4)
///     .build()?;
/// assert!(config.source.is_absolute());
/// # Ok::<(), mcrawfs_core::VfsError>(())
/// ```
#[derive(Clone, Debug)]
pub struct MountConfig {
    /// Canonicalized path of the recording.
    pub source: PathBuf,
    /// Render options applied until the next `update_options`.
    pub options: RenderOptions,
    /// Downsampling factor used when the draft flag is set.
    pub draft_scale: u32,
    /// Workers in the container-decode pool.
    pub io_threads: NonZeroUsize,
    /// Workers in the DNG-encode pool.
    pub processing_threads: NonZeroUsize,
}

impl MountConfig {
    /// Construct a configuration with default options for `source`.
    pub fn new<P: AsRef<Path>>(source: P) -> Result<Self, VfsError> {
        Self::builder(source).build()
    }

    pub fn builder<P: AsRef<Path>>(source: P) -> MountConfigBuilder {
        MountConfigBuilder::new(source)
    }
}

/// Builder for [`MountConfig`].
pub struct MountConfigBuilder {
    source: PathBuf,
    options: RenderOptions,
    draft_scale: u32,
    io_threads: NonZeroUsize,
    processing_threads: Option<NonZeroUsize>,
}

impl MountConfigBuilder {
    pub fn new<P: AsRef<Path>>(source: P) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            options: RenderOptions::NONE,
            draft_scale: DEFAULT_DRAFT_SCALE,
            io_threads: NonZeroUsize::new(IO_THREADS).expect("io thread default must be non-zero"),
            processing_threads: None,
        }
    }

    pub fn options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn draft_scale(mut self, draft_scale: u32) -> Self {
        self.draft_scale = draft_scale;
        self
    }

    pub fn io_threads(mut self, threads: NonZeroUsize) -> Self {
        self.io_threads = threads;
        self
    }

    pub fn processing_threads(mut self, threads: NonZeroUsize) -> Self {
        self.processing_threads = Some(threads);
        self
    }

    /// Validate the source path and finalize the configuration.
    pub fn build(self) -> Result<MountConfig, VfsError> {
        let source = canonicalize_existing_file(&self.source)?;
        let processing_threads = self
            .processing_threads
            .unwrap_or_else(|| thread::available_parallelism().unwrap_or(NonZeroUsize::MIN));
        Ok(MountConfig {
            source,
            options: self.options,
            draft_scale: self.draft_scale,
            io_threads: self.io_threads,
            processing_threads,
        })
    }
}

fn canonicalize_existing_file(path: &Path) -> Result<PathBuf, VfsError> {
    let canonical =
        fs::canonicalize(path).map_err(|_| VfsError::InvalidPath(path.to_path_buf()))?;
    if canonical.is_file() {
        Ok(canonical)
    } else {
        Err(VfsError::InvalidPath(canonical))
    }
}

/// Align an audio track to the first video frame.
///
/// Audio that starts after `video_t0` is trimmed from the front; audio
/// that starts before it gets a silence chunk prepended and every
/// following chunk shifted by the drift. Chunk timestamps are nanoseconds
/// throughout, frame counts round half away from zero, and a drift that
/// rounds to zero frames leaves the track untouched; running the
/// synchronizer a second time against the adjusted track is a no-op.
pub fn sync_audio(
    video_t0: Timestamp,
    chunks: &mut Vec<AudioChunk>,
    sample_rate: u32,
    channels: u16,
) {
    let Some(first) = chunks.first() else {
        return;
    };
    if sample_rate == 0 || channels == 0 {
        return;
    }

    let drift_ms = (first.timestamp - video_t0) as f64 * 1e-6;
    if drift_ms > 0.0 {
        // Audio starts after the video: trim the head.
        let frames_to_remove = (drift_ms * sample_rate as f64 / 1000.0).round() as u64;
        let mut remaining = frames_to_remove * u64::from(channels);

        let mut fully_erased = 0;
        for chunk in chunks.iter() {
            let samples = chunk.samples.len() as u64;
            if samples <= remaining {
                remaining -= samples;
                fully_erased += 1;
            } else {
                break;
            }
        }
        chunks.drain(..fully_erased);

        if remaining > 0 {
            if let Some(front) = chunks.first_mut() {
                let take = remaining as usize;
                front.samples.drain(..take);
                let trimmed_frames = take as i64 / i64::from(channels);
                front.timestamp += trimmed_frames * 1_000_000_000 / i64::from(sample_rate);
            }
        }
    } else {
        // Audio starts before the video: pad with silence.
        let silence_frames = (-drift_ms * sample_rate as f64 / 1000.0).round() as u64;
        let silence_samples = silence_frames * u64::from(channels);
        if silence_samples == 0 {
            return;
        }

        let shift = video_t0 - first.timestamp;
        for chunk in chunks.iter_mut() {
            chunk.timestamp += shift;
        }
        chunks.insert(
            0,
            AudioChunk {
                timestamp: video_t0,
                samples: vec![0; silence_samples as usize],
            },
        );
    }
}

/// Average frame rate over the positive inter-frame deltas, using a
/// running average so long recordings cannot overflow. Fewer than two
/// valid deltas yield 0.
fn frame_rate(frames: &[Timestamp]) -> f64 {
    let mut average = 0.0;
    let mut valid = 0u64;
    for pair in frames.windows(2) {
        let delta = (pair[1] - pair[0]) as f64;
        if delta > 0.0 {
            average += (delta - average) / (valid + 1) as f64;
            valid += 1;
        }
    }
    if valid < 2 {
        0.0
    } else {
        NANOS_PER_SECOND / average
    }
}

/// Presentation index of a frame: its distance from the first frame in
/// whole frame periods, clamped to zero.
fn presentation_index(timestamp: Timestamp, reference: Timestamp, fps: f64) -> i64 {
    if fps <= 0.0 {
        return 0;
    }
    let elapsed = (timestamp - reference) as f64;
    if elapsed <= 0.0 {
        0
    } else {
        (elapsed * fps / NANOS_PER_SECOND).round() as i64
    }
}

fn frame_file_name(index: i64) -> String {
    format!("frame-{index:06}.dng")
}

/// Produce the DNG entry list for a sorted timestamp sequence.
///
/// Numbering is presentation-time indexed: every frame advances the index
/// to its own presentation slot, and any slots skipped by dropped source
/// frames are filled with duplicate entries bound to the next real frame.
/// The result is a contiguous zero-padded range with no holes that
/// preserves the recording's real-time duration.
fn build_frame_entries(frames: &[Timestamp], fps: f64, dng_size: u64) -> Vec<Entry> {
    let mut entries = Vec::with_capacity(frames.len());
    let Some(&reference) = frames.first() else {
        return entries;
    };

    let mut next_index = 0i64;
    for &timestamp in frames {
        let pts = presentation_index(timestamp, reference, fps);
        while next_index <= pts {
            entries.push(Entry {
                kind: EntryKind::File,
                name: frame_file_name(next_index),
                size: dng_size,
                source: EntrySource::Frame(timestamp),
            });
            next_index += 1;
        }
    }
    entries
}

/// Copy-out slice of a fully materialized artifact: `[pos, pos + len)`
/// clamped to the artifact's length.
fn slice_range(data: &[u8], pos: u64, len: usize) -> Vec<u8> {
    let start = usize::try_from(pos.min(data.len() as u64)).unwrap_or(data.len());
    let end = start.saturating_add(len).min(data.len());
    data[start..end].to_vec()
}

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

enum PoolMessage<S> {
    Task(Task<S>),
    Shutdown,
}

/// Fixed-size worker pool over an mpsc queue. Every worker owns a private
/// state value built on startup; tasks run against that state, which is
/// how the IO pool keeps one decoder per thread without any locking.
///
/// Dropping the pool drains it: queued tasks run to completion before the
/// shutdown markers are consumed and the workers join.
struct WorkerPool<S> {
    sender: mpsc::Sender<PoolMessage<S>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl<S: 'static> WorkerPool<S> {
    fn new<F>(workers: usize, make_state: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel::<PoolMessage<S>>();
        let receiver = Arc::new(Mutex::new(receiver));
        let make_state = Arc::new(make_state);
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let receiver = Arc::clone(&receiver);
            let make_state = Arc::clone(&make_state);
            handles.push(thread::spawn(move || {
                let mut state = make_state();
                loop {
                    let message = {
                        let guard = receiver.lock().expect("worker receiver poisoned");
                        guard.recv()
                    };
                    match message {
                        Ok(PoolMessage::Task(task)) => task(&mut state),
                        Ok(PoolMessage::Shutdown) | Err(_) => break,
                    }
                }
            }));
        }

        Self { sender, handles }
    }

    /// Queue a task. On failure the message is handed back so the caller
    /// can decide what to do with the closure.
    fn submit<F>(&self, task: F) -> Result<(), PoolMessage<S>>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.sender
            .send(PoolMessage::Task(Box::new(task)))
            .map_err(|err| err.0)
    }
}

impl<S> Drop for WorkerPool<S> {
    fn drop(&mut self) {
        for _ in &self.handles {
            let _ = self.sender.send(PoolMessage::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

type DecoderCache<D> = HashMap<PathBuf, D>;

struct DecodedFrame {
    index: usize,
    raw: Vec<u8>,
    frame_metadata: Value,
    container_metadata: Value,
}

fn decode_frame<D: Decoder>(
    decoders: &mut DecoderCache<D>,
    source: &Path,
    timestamp: Timestamp,
) -> Result<DecodedFrame, VfsError> {
    let decoder = match decoders.entry(source.to_path_buf()) {
        MapEntry::Occupied(slot) => slot.into_mut(),
        MapEntry::Vacant(slot) => slot.insert(D::open(source)?),
    };

    let frames = decoder.frames()?;
    let index = frames
        .iter()
        .position(|&t| t == timestamp)
        .ok_or(VfsError::FrameNotFound(timestamp))?;

    let (raw, frame_metadata) = decoder.load_frame(timestamp)?;
    let container_metadata = decoder.container_metadata()?;
    Ok(DecodedFrame {
        index,
        raw,
        frame_metadata,
        container_metadata,
    })
}

/// The MCRAW projector: entry list plus lazy read pipeline.
///
/// Construction opens the recording once on the calling thread to build
/// the entry list: frame timestamps are sorted, the frame rate is
/// estimated, one probe frame is rendered to fix the advertised DNG size,
/// and the audio track is synchronized and serialized into memory. After
/// that the entry list and audio buffer are immutable until
/// [`update_options`] rebuilds them.
///
/// [`update_options`]: VirtualFileSystem::update_options
pub struct McrawFileSystem<D, E> {
    // Dropped in declaration order: the IO pool drains first, so its
    // tasks can still hand encode work to the processing pool.
    io_pool: WorkerPool<DecoderCache<D>>,
    processing_pool: Arc<WorkerPool<()>>,
    encoder: Arc<E>,
    source: PathBuf,
    draft_scale: u32,
    fps: f64,
    typical_dng_size: u64,
    entries: Vec<Entry>,
    audio_file: Vec<u8>,
}

impl<D, E> McrawFileSystem<D, E>
where
    D: Decoder + 'static,
    E: DngEncoder + Send + Sync + 'static,
{
    /// Open a recording and build its entry list.
    pub fn new(config: MountConfig, encoder: E) -> Result<Self, VfsError> {
        let mut fs = Self {
            io_pool: WorkerPool::new(config.io_threads.get(), HashMap::new),
            processing_pool: Arc::new(WorkerPool::new(config.processing_threads.get(), || ())),
            encoder: Arc::new(encoder),
            source: config.source,
            draft_scale: config.draft_scale,
            fps: 0.0,
            typical_dng_size: 0,
            entries: Vec::new(),
            audio_file: Vec::new(),
        };
        fs.rebuild(config.options)?;
        Ok(fs)
    }

    /// Estimated frame rate of the recording.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Advertised size of every DNG entry, measured from the probe frame.
    pub fn typical_dng_size(&self) -> u64 {
        self.typical_dng_size
    }

    fn rebuild(&mut self, options: RenderOptions) -> Result<(), VfsError> {
        self.entries.clear();
        self.audio_file.clear();

        let mut decoder = D::open(&self.source)?;
        let mut frames = decoder.frames()?;
        frames.sort_unstable();

        if frames.is_empty() {
            return Ok(());
        }

        debug!(
            "rebuilding entries for {} (options={:#x}, draft_scale={})",
            self.source.display(),
            options.bits(),
            self.draft_scale
        );

        self.fps = frame_rate(&frames);

        // One probe encode fixes the size every DNG entry advertises.
        let (raw, frame_metadata) = decoder.load_frame(frames[0])?;
        let container_metadata = decoder.container_metadata()?;
        let probe = self.encoder.generate_dng(
            &raw,
            &frame_metadata,
            &container_metadata,
            self.fps,
            0,
            options,
            options.scale_factor(self.draft_scale),
        )?;
        self.typical_dng_size = probe.len() as u64;

        #[cfg(windows)]
        self.entries.push(Entry {
            kind: EntryKind::File,
            name: "desktop.ini".to_string(),
            size: DESKTOP_INI.len() as u64,
            source: EntrySource::Static,
        });

        let mut audio_chunks = decoder.load_audio()?;
        if !audio_chunks.is_empty() {
            let sample_rate = decoder.audio_sample_rate_hz();
            let channels = decoder.num_audio_channels();
            sync_audio(frames[0], &mut audio_chunks, sample_rate, channels);

            let mut writer = AudioWriter::new(channels, sample_rate)?;
            for chunk in &audio_chunks {
                writer.write(&chunk.samples)?;
            }
            self.audio_file = writer.finish()?;
        }
        if !self.audio_file.is_empty() {
            self.entries.push(Entry {
                kind: EntryKind::File,
                name: "audio.wav".to_string(),
                size: self.audio_file.len() as u64,
                source: EntrySource::Audio,
            });
        }

        self.entries
            .extend(build_frame_entries(&frames, self.fps, self.typical_dng_size));
        Ok(())
    }

    fn queue_frame_read(
        &self,
        timestamp: Timestamp,
        options: RenderOptions,
        pos: u64,
        len: usize,
        on_complete: ReadCallback,
    ) {
        let source = self.source.clone();
        let encoder = Arc::clone(&self.encoder);
        let processing = Arc::clone(&self.processing_pool);
        let fps = self.fps;
        let scale = options.scale_factor(self.draft_scale);

        let queued = self.io_pool.submit(move |decoders| {
            debug!("decoding frame {timestamp} (options={:#x})", options.bits());
            let decoded = decode_frame::<D>(decoders, &source, timestamp);

            let encode = move |_: &mut ()| {
                let result = decoded.and_then(|frame| {
                    let dng = encoder.generate_dng(
                        &frame.raw,
                        &frame.frame_metadata,
                        &frame.container_metadata,
                        fps,
                        frame.index,
                        options,
                        scale,
                    )?;
                    Ok(slice_range(&dng, pos, len))
                });
                if let Err(err) = &result {
                    error!("failed to read frame {timestamp}: {err}");
                }
                on_complete(result);
            };

            // The processing pool outlives the IO pool, so this only fails
            // mid-teardown; run inline then so the callback still fires.
            if let Err(PoolMessage::Task(task)) = processing.submit(encode) {
                task(&mut ());
            }
        });

        if queued.is_err() {
            error!("io pool unavailable; dropping read for frame {timestamp}");
        }
    }
}

impl<D, E> VirtualFileSystem for McrawFileSystem<D, E>
where
    D: Decoder + 'static,
    E: DngEncoder + Send + Sync + 'static,
{
    fn list_files(&self, filter: Option<&str>) -> Vec<Entry> {
        match filter {
            Some(pattern) if !pattern.is_empty() => self
                .entries
                .iter()
                .filter(|entry| entry.name.contains(pattern))
                .cloned()
                .collect(),
            _ => self.entries.clone(),
        }
    }

    fn find_entry(&self, path: &str) -> Option<Entry> {
        let name = path.trim_start_matches(['/', '\\']);
        self.entries.iter().find(|entry| entry.name == name).cloned()
    }

    fn read_file(
        &self,
        entry: &Entry,
        options: RenderOptions,
        pos: u64,
        len: usize,
        on_complete: ReadCallback,
    ) -> ReadDispatch {
        match entry.source {
            EntrySource::Static => {
                #[cfg(windows)]
                {
                    ReadDispatch::Sync(slice_range(DESKTOP_INI.as_bytes(), pos, len))
                }
                #[cfg(not(windows))]
                {
                    ReadDispatch::Sync(Vec::new())
                }
            }
            EntrySource::Audio => ReadDispatch::Sync(slice_range(&self.audio_file, pos, len)),
            EntrySource::Frame(timestamp) => {
                self.queue_frame_read(timestamp, options, pos, len, on_complete);
                ReadDispatch::Queued
            }
        }
    }

    fn update_options(
        &mut self,
        options: RenderOptions,
        draft_scale: u32,
    ) -> Result<(), VfsError> {
        self.draft_scale = draft_scale;
        self.rebuild(options)
    }
}
