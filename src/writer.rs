//! Writer variants (§4.3): accumulate translated PCM16 frames and, on
//! end-of-stream, produce a complete WAV artifact. Grounded in the
//! original's `adapter/file.py` / `adapter/buffer.py` writers.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::audio::AudioFrame;
use crate::error::Result;
use crate::task::{Task, TaskEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Idle,
    Draining,
    Finalized,
}

/// Serialize raw PCM16 to a WAV byte buffer, using the given rate/channel
/// metadata. Out-of-scope pure serializer (§1), backed by `hound`.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, num_channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: num_channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut wav = hound::WavWriter::new(&mut cursor, spec)?;
        for chunk in pcm.chunks_exact(2) {
            wav.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
        }
        wav.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[async_trait]
pub trait Writer: Send + Sync {
    /// Append `frame`'s PCM bytes to the accumulator. Optionally drops
    /// frames whose samples are all zero, depending on the writer's
    /// `drop_empty_frames` configuration.
    async fn write_frame(&self, frame: Option<AudioFrame>) -> Result<()>;

    /// Produce the WAV artifact and commit it to the sink. Called exactly
    /// once, at shutdown.
    async fn finalize(&self) -> Result<()>;
}

struct Accumulator {
    pcm: Mutex<Vec<u8>>,
    sample_rate: AtomicU32,
    num_channels: AtomicU16,
    state: Mutex<WriterState>,
    drop_empty_frames: bool,
}

impl Accumulator {
    fn new(drop_empty_frames: bool) -> Self {
        Self {
            pcm: Mutex::new(Vec::new()),
            sample_rate: AtomicU32::new(0),
            num_channels: AtomicU16::new(0),
            state: Mutex::new(WriterState::Idle),
            drop_empty_frames,
        }
    }

    async fn write_frame(&self, frame: Option<AudioFrame>) {
        let frame = match frame {
            Some(f) => f,
            None => {
                *self.state.lock().await = WriterState::Draining;
                return;
            }
        };
        if self.drop_empty_frames && frame.is_silence() {
            return;
        }
        if self.sample_rate.load(Ordering::SeqCst) == 0 {
            self.sample_rate.store(frame.sample_rate(), Ordering::SeqCst);
            self.num_channels.store(frame.num_channels(), Ordering::SeqCst);
        }
        self.pcm.lock().await.extend_from_slice(&frame.to_bytes());
    }

    async fn wav_bytes(&self) -> Result<Vec<u8>> {
        *self.state.lock().await = WriterState::Finalized;
        let sample_rate = self.sample_rate.load(Ordering::SeqCst).max(24000);
        let num_channels = self.num_channels.load(Ordering::SeqCst).max(1);
        let pcm = self.pcm.lock().await;
        pcm_to_wav(&pcm, sample_rate, num_channels)
    }
}

/// Writes the finalized WAV to a file on disk. Deletes a partially
/// written file if `finalize` fails.
pub struct FileWriter {
    path: PathBuf,
    acc: Accumulator,
}

impl FileWriter {
    pub fn new(path: impl Into<PathBuf>, drop_empty_frames: bool) -> Self {
        Self {
            path: path.into(),
            acc: Accumulator::new(drop_empty_frames),
        }
    }
}

#[async_trait]
impl Writer for FileWriter {
    async fn write_frame(&self, frame: Option<AudioFrame>) -> Result<()> {
        self.acc.write_frame(frame).await;
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        match self.acc.wav_bytes().await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&self.path, &bytes).await {
                    error!("FileWriter failed to write {}: {e}", self.path.display());
                    let _ = tokio::fs::remove_file(&self.path).await;
                    return Err(e.into());
                }
                Ok(())
            }
            Err(e) => {
                warn!("FileWriter finalize failed: {e}");
                let _ = tokio::fs::remove_file(&self.path).await;
                Err(e)
            }
        }
    }
}

/// Rewinds a caller-supplied buffer and writes the finalized WAV bytes
/// into it.
pub struct BufferWriter {
    sink: Mutex<Vec<u8>>,
    acc: Accumulator,
}

impl BufferWriter {
    pub fn new(drop_empty_frames: bool) -> Self {
        Self {
            sink: Mutex::new(Vec::new()),
            acc: Accumulator::new(drop_empty_frames),
        }
    }

    pub async fn take_bytes(&self) -> Vec<u8> {
        std::mem::take(&mut *self.sink.lock().await)
    }
}

#[async_trait]
impl Writer for BufferWriter {
    async fn write_frame(&self, frame: Option<AudioFrame>) -> Result<()> {
        self.acc.write_frame(frame).await;
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let bytes = self.acc.wav_bytes().await?;
        let mut sink = self.sink.lock().await;
        sink.clear();
        sink.extend_from_slice(&bytes);
        Ok(())
    }
}

/// Adapts any `Writer` to the `Task` lifecycle so Manager can start it
/// alongside the other components and await its `ready` latch like
/// everything else (§4.12 startup order lists Writer among the tasks
/// started in parallel). `finalize` runs in `exit`, once, driven by
/// Manager's writer-mercy shutdown step raising `stopper`.
pub struct WriterTask {
    events: TaskEvents,
    writer: Arc<dyn Writer>,
}

impl WriterTask {
    pub fn new(writer: Arc<dyn Writer>) -> Self {
        Self {
            events: TaskEvents::new("writer"),
            writer,
        }
    }
}

#[async_trait]
impl Task for WriterTask {
    fn name(&self) -> &str {
        "writer"
    }

    fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot(&mut self) -> Result<()> {
        Ok(())
    }

    async fn do_work(&mut self) -> Result<()> {
        self.events.stopper.wait().await;
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        self.writer.finalize().await
    }
}
