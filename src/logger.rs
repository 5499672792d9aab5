//! Logger task (§4.14): when `cfg.log_file` is set, subscribes to both of
//! Realtime's buses and persists a full raw message trace to disk on
//! exit. Logger never fails shutdown: trace-writing errors are logged,
//! not propagated.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::Result;
use crate::message::ControlMessage;
use crate::realtime::Realtime;
use crate::task::{Task, TaskEvents};

#[derive(Debug, Clone, Copy, Serialize)]
enum Direction {
    Outbound,
    Inbound,
}

#[derive(Serialize)]
struct TraceEntry {
    channel: &'static str,
    direction: Direction,
    raw: String,
}

#[derive(Serialize)]
struct TraceFile<'a> {
    version: &'static str,
    sysinfo: serde_json::Value,
    messages: &'a [TraceEntry],
    start_ts: f64,
    cfg: &'a Config,
    log_file: &'a str,
    trace_file: String,
    debug: bool,
    logs: &'a [String],
}

fn sysinfo() -> serde_json::Value {
    serde_json::json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "family": std::env::consts::FAMILY,
    })
}

pub struct Logger {
    events: TaskEvents,
    realtime: Arc<Realtime>,
    log_file: Option<PathBuf>,
    config: Config,
    start_ts: f64,
    debug: bool,
    messages: tokio::sync::Mutex<Vec<TraceEntry>>,
}

impl Logger {
    pub fn new(realtime: Arc<Realtime>, log_file: Option<PathBuf>, config: Config, debug: bool, start_ts: f64) -> Self {
        Self {
            events: TaskEvents::new("logger"),
            realtime,
            log_file,
            config,
            start_ts,
            debug,
            messages: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    async fn record(&self, channel: &'static str, direction: Direction, msg: &ControlMessage) {
        let raw = msg.encode().unwrap_or_else(|e| format!("<<encode error: {e}>>"));
        self.messages.lock().await.push(TraceEntry { channel, direction, raw });
    }

    async fn write_trace(&self) -> Result<()> {
        let Some(log_file) = &self.log_file else {
            return Ok(());
        };
        let trace_path = format!("{}.trace.json", log_file.display());
        let messages = self.messages.lock().await;
        let trace = TraceFile {
            version: env!("CARGO_PKG_VERSION"),
            sysinfo: sysinfo(),
            messages: &messages,
            start_ts: self.start_ts,
            cfg: &self.config,
            log_file: &log_file.to_string_lossy(),
            trace_file: trace_path.clone(),
            debug: self.debug,
            logs: &[],
        };
        let bytes = serde_json::to_vec_pretty(&trace)?;
        tokio::fs::write(&trace_path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl Task for Logger {
    fn name(&self) -> &str {
        "logger"
    }

    fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot(&mut self) -> Result<()> {
        Ok(())
    }

    async fn do_work(&mut self) -> Result<()> {
        if self.log_file.is_none() {
            self.events.stopper.wait().await;
            return Ok(());
        }

        let mut in_sub = self.realtime.in_bus.subscribe("logger-in", 256);
        let mut out_sub = self.realtime.out_bus.subscribe("logger-out", 256);
        loop {
            tokio::select! {
                msg = in_sub.recv() => {
                    match msg {
                        Some(msg) => self.record("in_bus", Direction::Outbound, &msg).await,
                        None => {}
                    }
                }
                msg = out_sub.recv() => {
                    match msg {
                        Some(msg) => self.record("out_bus", Direction::Inbound, &msg).await,
                        None => {}
                    }
                }
                _ = self.events.stopper.wait() => break,
            }
        }
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        if let Err(e) = self.write_trace().await {
            error!("logger: failed to write trace file: {e}");
        } else if self.log_file.is_some() {
            debug!("logger: trace file written");
        }
        Ok(())
    }
}
