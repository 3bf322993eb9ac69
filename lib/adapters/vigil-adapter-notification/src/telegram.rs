use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;

use vigil_ports::{MessengerPort, OutboundMessage};

const ACK_PREFIX: &str = "ack_";

#[derive(Debug, Serialize)]
struct InlineButton {
    text: String,
    callback_data: String,
}

#[derive(Debug, Serialize)]
struct InlineKeyboard {
    inline_keyboard: Vec<Vec<InlineButton>>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboard>,
}

/// Callback payload carried by the acknowledge button.
pub fn ack_callback_data(alert_id: i64) -> String {
    format!("{ACK_PREFIX}{alert_id}")
}

/// Alert id encoded in an acknowledge callback, if it is one.
pub fn parse_ack_callback(data: &str) -> Option<i64> {
    data.strip_prefix(ACK_PREFIX)?.parse().ok()
}

/// Sends messages through the Telegram bot API.
#[derive(Clone)]
pub struct TelegramMessenger {
    client: reqwest::Client,
    endpoint: String,
}

impl TelegramMessenger {
    pub fn new(api_url: String, token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build telegram http client")?;
        let endpoint = format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), token);
        Ok(Self { client, endpoint })
    }
}

fn request_body(message: &OutboundMessage) -> SendMessage<'_> {
    SendMessage {
        chat_id: message.recipient,
        text: &message.text,
        reply_markup: message.ack_alert_id.map(|id| InlineKeyboard {
            inline_keyboard: vec![vec![InlineButton {
                text: "Acknowledge".to_string(),
                callback_data: ack_callback_data(id),
            }]],
        }),
    }
}

#[async_trait]
impl MessengerPort for TelegramMessenger {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request_body(&message))
            .send()
            .await
            .with_context(|| format!("failed to reach telegram for chat {}", message.recipient))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("telegram rejected message to {}: {status} {body}", message.recipient);
        }
        Ok(())
    }
}
