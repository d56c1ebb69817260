use tracing::{info, warn};

use crate::types::{Level, Notice};

/// Sink for user-facing notices (the notification banner collaborator).
pub trait Notifier: Send {
    fn notify(&mut self, level: Level, message: &str);
}

/// Emits each notice as a single JSON line on stdout, alongside a log
/// entry.
#[derive(Default)]
pub struct StdoutNotifier {
    // A notice emitted while another is being rendered is logged and
    // dropped instead of re-entering the sink.
    emitting: bool,
}

impl StdoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for StdoutNotifier {
    fn notify(&mut self, level: Level, message: &str) {
        if self.emitting {
            warn!("Dropped re-entrant notice: {message}");
            return;
        }
        self.emitting = true;
        match level {
            Level::Error | Level::Warning => warn!("{message}"),
            Level::Success | Level::Info => info!("{message}"),
        }
        let notice = Notice {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
        };
        if let Ok(json) = serde_json::to_string(&notice) {
            println!("{json}");
        }
        self.emitting = false;
    }
}
