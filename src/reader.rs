//! Reader variants (§4.2): produce PCM16 bytes at the consumer's cadence.
//! Grounded in the original's `adapter/file.py` / `adapter/buffer.py` / the
//! pipe-based subprocess reader, generalized behind one `Reader` trait.

use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{PalabraError, Result};
use crate::process_registry;
use crate::task::{Task, TaskEvents};

/// Track settings a Reader needs before `boot`: the session's sample rate
/// and channel count, so file/buffer decoding targets the right format.
#[derive(Debug, Clone, Copy)]
pub struct TrackSettings {
    pub sample_rate: u32,
    pub num_channels: u16,
}

#[async_trait]
pub trait Reader: Send {
    fn set_track_settings(&mut self, settings: TrackSettings);

    /// Open/decode the source. Called once, before `read`.
    async fn boot(&mut self) -> Result<()>;

    /// Return up to `size` bytes, or `None` on EOF. Must not block
    /// indefinitely.
    async fn read(&mut self, size: usize) -> Option<Vec<u8>>;
}

/// Out-of-scope external collaborator, specified by interface only
/// (§1): converts arbitrary container/codec bytes to raw PCM16. This
/// implementation passes already-PCM16 bytes through unchanged and
/// unwraps a WAV container via `hound` when one is detected — a minimal
/// stand-in for the real decoder the production system would plug in.
pub fn decode_to_pcm16(bytes: &[u8], _sample_rate: u32) -> Result<Vec<u8>> {
    if bytes.len() >= 4 && &bytes[0..4] == b"RIFF" {
        let cursor = std::io::Cursor::new(bytes.to_vec());
        let mut reader = hound::WavReader::new(cursor)?;
        let samples: std::result::Result<Vec<i16>, hound::Error> =
            reader.samples::<i16>().collect();
        let samples = samples?;
        let mut out = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        return Ok(out);
    }
    Ok(bytes.to_vec())
}

/// Decodes an entire file to PCM16 at `boot`; `read` slices the resulting
/// in-memory buffer.
pub struct FileReader {
    path: PathBuf,
    settings: TrackSettings,
    buffer: Vec<u8>,
    position: usize,
}

impl FileReader {
    /// File-not-found is fatal at construction (§4.2 "Failure").
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(PalabraError::Configuration(format!(
                "reader source file not found: {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            settings: TrackSettings {
                sample_rate: 24000,
                num_channels: 1,
            },
            buffer: Vec::new(),
            position: 0,
        })
    }
}

#[async_trait]
impl Reader for FileReader {
    fn set_track_settings(&mut self, settings: TrackSettings) {
        self.settings = settings;
    }

    async fn boot(&mut self) -> Result<()> {
        let bytes = tokio::fs::read(&self.path).await?;
        self.buffer = decode_to_pcm16(&bytes, self.settings.sample_rate)?;
        debug!(
            "FileReader booted: {} bytes decoded from {}",
            self.buffer.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn read(&mut self, size: usize) -> Option<Vec<u8>> {
        if self.position >= self.buffer.len() {
            return None;
        }
        let end = (self.position + size).min(self.buffer.len());
        let chunk = self.buffer[self.position..end].to_vec();
        self.position = end;
        Some(chunk)
    }
}

/// Reads from a caller-supplied in-memory PCM16 buffer; position advances
/// on each read.
pub struct BufferReader {
    buffer: Vec<u8>,
    position: usize,
    settings: TrackSettings,
}

impl BufferReader {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            position: 0,
            settings: TrackSettings {
                sample_rate: 24000,
                num_channels: 1,
            },
        }
    }
}

#[async_trait]
impl Reader for BufferReader {
    fn set_track_settings(&mut self, settings: TrackSettings) {
        self.settings = settings;
    }

    async fn boot(&mut self) -> Result<()> {
        self.buffer = decode_to_pcm16(&self.buffer, self.settings.sample_rate)?;
        Ok(())
    }

    async fn read(&mut self, size: usize) -> Option<Vec<u8>> {
        if self.position >= self.buffer.len() {
            return None;
        }
        let end = (self.position + size).min(self.buffer.len());
        let chunk = self.buffer[self.position..end].to_vec();
        self.position = end;
        Some(chunk)
    }
}

struct PipeBuffer {
    data: VecDeque<u8>,
    eof: bool,
}

/// Spawns a subprocess and drains its stdout into an unbounded background
/// buffer on a dedicated blocking OS thread (the one real mutex in this
/// crate's cooperative core, per §5 "Shared-resource policy"); `read`
/// serves from that buffer. The child is registered with
/// `process_registry` so it is killed on shutdown or signal.
pub struct PipeReader {
    command: String,
    args: Vec<String>,
    settings: TrackSettings,
    buffer: Arc<Mutex<PipeBuffer>>,
}

impl PipeReader {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            settings: TrackSettings {
                sample_rate: 24000,
                num_channels: 1,
            },
            buffer: Arc::new(Mutex::new(PipeBuffer {
                data: VecDeque::new(),
                eof: false,
            })),
        }
    }
}

#[async_trait]
impl Reader for PipeReader {
    fn set_track_settings(&mut self, settings: TrackSettings) {
        self.settings = settings;
    }

    async fn boot(&mut self) -> Result<()> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PalabraError::Boot(format!("failed to spawn pipe reader command: {e}"))
            })?;
        let mut stdout = child.stdout.take().ok_or_else(|| {
            PalabraError::Boot("pipe reader child had no stdout".to_string())
        })?;

        let buffer = self.buffer.clone();
        std::thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match stdout.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        buffer.lock().unwrap().data.extend(&chunk[..n]);
                    }
                    Err(e) => {
                        warn!("pipe reader stdout read error: {e}");
                        break;
                    }
                }
            }
            buffer.lock().unwrap().eof = true;
        });

        process_registry::register(child);
        Ok(())
    }

    async fn read(&mut self, size: usize) -> Option<Vec<u8>> {
        loop {
            {
                let mut guard = self.buffer.lock().unwrap();
                if !guard.data.is_empty() {
                    let take = size.min(guard.data.len());
                    let chunk: Vec<u8> = guard.data.drain(..take).collect();
                    return Some(chunk);
                }
                if guard.eof {
                    return None;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

/// Adapts any `Reader` to the `Task` lifecycle (§4.2 "Lifecycle: boot
/// loads/opens the source... do idles until stopper or eof; exit is a
/// no-op beyond logging"). `Sender` holds the same `Arc<Mutex<dyn
/// Reader>>` for its own `read` calls.
pub struct ReaderTask {
    events: TaskEvents,
    reader: Arc<tokio::sync::Mutex<dyn Reader>>,
}

impl ReaderTask {
    pub fn new(reader: Arc<tokio::sync::Mutex<dyn Reader>>) -> Self {
        Self {
            events: TaskEvents::new("reader"),
            reader,
        }
    }
}

#[async_trait]
impl Task for ReaderTask {
    fn name(&self) -> &str {
        "reader"
    }

    fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot(&mut self) -> Result<()> {
        self.reader.lock().await.boot().await
    }

    async fn do_work(&mut self) -> Result<()> {
        self.events.stopper.wait().await;
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        debug!("reader exiting");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffer_reader_yields_chunks_then_eof() {
        let mut reader = BufferReader::new(vec![1, 2, 3, 4, 5]);
        reader.boot().await.unwrap();
        assert_eq!(reader.read(2).await, Some(vec![1, 2]));
        assert_eq!(reader.read(2).await, Some(vec![3, 4]));
        assert_eq!(reader.read(2).await, Some(vec![5]));
        assert_eq!(reader.read(2).await, None);
    }

    #[test]
    fn file_reader_rejects_missing_file_at_construction() {
        let result = FileReader::new("/nonexistent/path/does-not-exist.wav");
        assert!(result.is_err());
    }

    #[test]
    fn decode_to_pcm16_passes_through_non_wav_bytes() {
        let bytes = vec![1, 2, 3, 4];
        let decoded = decode_to_pcm16(&bytes, 24000).unwrap();
        assert_eq!(decoded, bytes);
    }
}
