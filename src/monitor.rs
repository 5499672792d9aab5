//! Monitor task (§4.13): a sliding window over recent inbound messages,
//! used to detect prolonged silence (no transcription activity) and to
//! keep per-type message counts for diagnostics.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::message::ControlMessage;
use crate::realtime::Realtime;
use crate::task::{Task, TaskEvents};
use crate::timing::EMPTY_MESSAGE_THRESHOLD;

fn message_type_label(msg: &ControlMessage) -> &'static str {
    match msg {
        ControlMessage::SetTask { .. } => "set_task",
        ControlMessage::GetTask => "get_task",
        ControlMessage::CurrentTask { .. } => "current_task",
        ControlMessage::EndTask { .. } => "end_task",
        ControlMessage::PipelineTimings { .. } => "pipeline_timings",
        ControlMessage::QueueStatus { .. } => "queue_status",
        ControlMessage::Transcription(_) => "transcription",
        ControlMessage::OutputAudioData { .. } => "output_audio_data",
        ControlMessage::InputAudioData { .. } => "input_audio_data",
        ControlMessage::Unknown { .. } => "unknown",
    }
}

#[derive(Default)]
struct MonitorState {
    window: VecDeque<bool>,
    counts: HashMap<&'static str, u64>,
}

pub struct Monitor {
    events: TaskEvents,
    realtime: Arc<Realtime>,
    state: Arc<RwLock<MonitorState>>,
}

impl Monitor {
    pub fn new(realtime: Arc<Realtime>) -> Self {
        Self {
            events: TaskEvents::new("monitor"),
            realtime,
            state: Arc::new(RwLock::new(MonitorState::default())),
        }
    }

    /// `true` iff no `TranscriptionMessage` appears in the current window.
    pub async fn is_silent(&self) -> bool {
        let state = self.state.read().await;
        !state.window.iter().any(|&is_transcription| is_transcription)
    }

    pub async fn count_for(&self, message_type: &str) -> u64 {
        *self.state.read().await.counts.get(message_type).unwrap_or(&0)
    }
}

#[async_trait]
impl Task for Monitor {
    fn name(&self) -> &str {
        "monitor"
    }

    fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot(&mut self) -> Result<()> {
        Ok(())
    }

    async fn do_work(&mut self) -> Result<()> {
        let mut sub_out = self.realtime.out_bus.subscribe("monitor-out", 256);
        loop {
            tokio::select! {
                msg = sub_out.recv() => {
                    match msg {
                        Some(msg) => {
                            let mut state = self.state.write().await;
                            let label = message_type_label(&msg);
                            *state.counts.entry(label).or_insert(0) += 1;
                            state.window.push_back(matches!(msg, ControlMessage::Transcription(_)));
                            while state.window.len() > EMPTY_MESSAGE_THRESHOLD {
                                state.window.pop_front();
                            }
                        }
                        None => break,
                    }
                }
                _ = self.events.stopper.wait() => break,
            }
        }
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::message::TranscriptionKind;
    use crate::transport::control::ControlTransport;
    use crate::transport::WsControlTransport;

    fn make_realtime() -> Arc<Realtime> {
        let control: Arc<dyn ControlTransport> = Arc::new(WsControlTransport::new());
        Arc::new(Realtime::new(
            control,
            crate::realtime::no_media_control(),
            Config::new("en", "es"),
        ))
    }

    #[tokio::test]
    async fn silent_when_window_has_no_transcriptions() {
        let realtime = make_realtime();
        let monitor = Monitor::new(realtime.clone());
        let events = monitor.events.clone();

        let handle = tokio::spawn(async move {
            let mut monitor = monitor;
            let _ = crate::task::run_task(&mut monitor).await;
        });
        events.ready.wait().await;

        realtime
            .out_bus
            .publish(Some(ControlMessage::QueueStatus {
                data: Default::default(),
            }))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        events.stopper.raise();
        let _ = tokio::time::timeout(std::time::Duration::from_millis(200), handle).await;
    }

    #[tokio::test]
    async fn not_silent_after_transcription_message() {
        let realtime = make_realtime();
        let monitor = Monitor::new(realtime.clone());
        let state = monitor.state.clone();
        let events = monitor.events.clone();

        let handle = tokio::spawn(async move {
            let mut monitor = monitor;
            let _ = crate::task::run_task(&mut monitor).await;
        });
        events.ready.wait().await;

        realtime
            .out_bus
            .publish(Some(ControlMessage::Transcription(
                crate::message::TranscriptionMessage {
                    kind: TranscriptionKind::Validated,
                    transcription_id: "a".into(),
                    text: "hi".into(),
                    language: "en".into(),
                    segments: vec![],
                },
            )))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let is_silent = !state.read().await.window.iter().any(|&x| x);
        assert!(!is_silent);

        events.stopper.raise();
        let _ = tokio::time::timeout(std::time::Duration::from_millis(200), handle).await;
    }
}
