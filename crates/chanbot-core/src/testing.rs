use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{errors::Error, ports::ChatPort, Result};

/// ChatPort fake that records every outbound message as `(target, text)`.
#[derive(Default)]
pub struct RecordingPort {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingPort {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, target: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatPort for RecordingPort {
    async fn send_message(&self, target: &str, text: &str) -> Result<()> {
        if self.fail {
            return Err(Error::Transport("connection closed".to_string()));
        }
        self.sent.lock().push((target.to_string(), text.to_string()));
        Ok(())
    }
}
