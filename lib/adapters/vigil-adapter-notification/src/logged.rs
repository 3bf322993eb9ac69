use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use vigil_ports::{MessengerPort, OutboundMessage};

/// Writes messages to the tracing log and keeps a copy of each.
#[derive(Debug, Default)]
pub struct LogMessenger {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl LogMessenger {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessengerPort for LogMessenger {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        tracing::info!(
            recipient = message.recipient,
            ack_alert_id = ?message.ack_alert_id,
            text = %message.text,
            "message"
        );
        self.sent
            .lock()
            .map_err(|_| anyhow!("log messenger lock poisoned"))?
            .push(message);
        Ok(())
    }
}
