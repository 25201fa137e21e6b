//! Front-end agnostic progress, log and completion signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

/// Event emitted by long-running operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SetupEvent {
    Progress { percent: u8, message: String },
    Log { line: String },
    Completed,
    Failed { error: String },
}

/// Anything that can receive [`SetupEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SetupEvent);
}

impl EventSink for mpsc::UnboundedSender<SetupEvent> {
    fn emit(&self, event: SetupEvent) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.send(event);
    }
}

/// Discards events; log lines still reach the `log` facade via [`Reporter`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SetupEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SetupEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SetupEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn percentages(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SetupEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SetupEvent::Log { line } => Some(line),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SetupEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Handle passed down to every component that reports progress or logs.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn EventSink>,
}

impl Reporter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Reporter that only forwards to the `log` facade.
    pub fn silent() -> Self {
        Self::new(Arc::new(NullSink))
    }

    pub fn progress(&self, percent: u8, message: &str) {
        log::info!("[{:>3}%] {}", percent, message);
        self.sink.emit(SetupEvent::Progress {
            percent,
            message: message.to_string(),
        });
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        log::info!("{}", line);
        self.sink.emit(SetupEvent::Log { line });
    }

    pub fn warn(&self, line: impl Into<String>) {
        let line = line.into();
        log::warn!("{}", line);
        self.sink.emit(SetupEvent::Log { line });
    }

    pub fn completed(&self) {
        self.sink.emit(SetupEvent::Completed);
    }

    pub fn failed(&self, error: &str) {
        self.sink.emit(SetupEvent::Failed {
            error: error.to_string(),
        });
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

/// Coarse stop request, honoured between pipeline phases only.
#[derive(Debug, Default, Clone)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_forwards_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = Reporter::new(Arc::clone(&sink) as Arc<dyn EventSink>);
        reporter.progress(5, "Starting");
        reporter.log("line one");
        reporter.completed();
        assert_eq!(
            sink.events(),
            vec![
                SetupEvent::Progress {
                    percent: 5,
                    message: "Starting".to_string()
                },
                SetupEvent::Log {
                    line: "line one".to_string()
                },
                SetupEvent::Completed,
            ]
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(SetupEvent::Failed {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"event": "failed", "error": "boom"}));
    }

    #[tokio::test]
    async fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let reporter = Reporter::new(Arc::new(tx));
        reporter.log("nobody listens");
    }
}
