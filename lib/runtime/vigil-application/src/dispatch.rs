use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use vigil_domain::{
    Alert, AlertId, NotificationsConfig, RecipientId, ValidatorStatus, is_valid_address,
};
use vigil_ports::{CachePort, Clock, MessengerPort, OutboundMessage};

use crate::error::{ServiceError, ServiceResult};
use crate::keys;
use crate::shutdown::Shutdown;

const TOPIC_CAPACITY: usize = 1_024;
const RATE_WINDOW: Duration = Duration::from_secs(60);
const DETAILS_SPAN_SECS: i64 = 3_600;

/// Outcome of fanning one message out to its recipients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub rate_limited: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.rate_limited + self.failed
    }
}

enum Outcome {
    Delivered,
    RateLimited,
    Failed,
}

/// Chat text for an alert.
pub fn format_alert_message(alert: &Alert, details_base_url: Option<&str>) -> String {
    let marker = match alert.status {
        ValidatorStatus::NotOk => "❌",
        _ => "✅",
    };
    let at = DateTime::from_timestamp(alert.emitted_at, 0)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| alert.emitted_at.to_string());
    let mut message = format!(
        "{marker} {at}\nValidator {} is now {}",
        alert.validator_id, alert.status
    );
    if alert.previous_status != ValidatorStatus::Unknown {
        let secs = alert.previous_duration_secs();
        message.push_str(&format!(
            "\nPrevious state {}, duration: {}h {} min.",
            alert.previous_status,
            secs / 3_600,
            (secs / 60) % 60
        ));
    }
    if let Some(base) = details_base_url.filter(|base| !base.is_empty()) {
        message.push_str(&format!(
            "\n\nCheck details at: {}/?adnl={}&from={}&to={}",
            base.trim_end_matches('/'),
            alert.validator_id,
            alert.emitted_at,
            alert.emitted_at + DETAILS_SPAN_SECS
        ));
    }
    message
}

/// Fans alerts out to subscribed recipients with a per-minute rate limit.
pub struct AlertDispatcher {
    cache: Arc<dyn CachePort>,
    messenger: Arc<dyn MessengerPort>,
    clock: Arc<dyn Clock>,
    config: NotificationsConfig,
    topic: broadcast::Sender<String>,
    listener: Mutex<Option<broadcast::Receiver<String>>>,
}

impl AlertDispatcher {
    pub fn new(
        cache: Arc<dyn CachePort>,
        messenger: Arc<dyn MessengerPort>,
        clock: Arc<dyn Clock>,
        config: NotificationsConfig,
    ) -> Self {
        let (topic, listener) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            cache,
            messenger,
            clock,
            config,
            topic,
            listener: Mutex::new(Some(listener)),
        }
    }

    pub async fn load_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        let Some(payload) = self.cache.get(&keys::alert(id)).await? else {
            return Ok(None);
        };
        let alert = serde_json::from_slice(&payload)
            .with_context(|| format!("alert {id} is not decodable"))?;
        Ok(Some(alert))
    }

    pub async fn store_alert(&self, alert: &Alert) -> Result<()> {
        let payload = serde_json::to_vec(alert).context("failed to encode alert")?;
        self.cache.set(&keys::alert(alert.id), payload, None).await
    }

    /// Persists the alert and puts it on the topic. Having no listener is fine.
    pub async fn publish(&self, alert: &Alert) -> Result<()> {
        self.store_alert(alert).await?;
        let payload = serde_json::to_string(alert).context("failed to encode alert")?;
        if self.topic.send(payload).is_err() {
            tracing::debug!(alert_id = alert.id, "no alert listener attached");
        }
        Ok(())
    }

    /// Delivers every published alert until shutdown.
    pub async fn run_listener(self: Arc<Self>, shutdown: Shutdown) {
        let taken = self.listener.lock().ok().and_then(|mut slot| slot.take());
        let mut rx = taken.unwrap_or_else(|| self.topic.subscribe());
        let idle = Duration::from_secs(self.config.idle_log_secs.max(1));
        tracing::info!("alert listener started");
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                received = rx.recv() => match received {
                    Ok(payload) => self.handle_payload(&payload).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "alert listener lagged, alerts dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(idle) => {
                    tracing::debug!("no alerts published, waiting");
                }
            }
        }
        tracing::info!("alert listener stopped");
    }

    async fn handle_payload(&self, payload: &str) {
        let alert: Alert = match serde_json::from_str(payload) {
            Ok(alert) => alert,
            Err(err) => {
                tracing::warn!(error = %err, "skipping undecodable alert payload");
                return;
            }
        };
        match self.deliver(&alert).await {
            Ok(report) => tracing::info!(
                alert_id = alert.id,
                validator = %alert.validator_id,
                delivered = report.delivered,
                rate_limited = report.rate_limited,
                failed = report.failed,
                "alert delivered"
            ),
            Err(err) => tracing::warn!(alert_id = alert.id, error = %err, "alert delivery failed"),
        }
    }

    /// Subscribers of the alert's validator, or the configured defaults.
    pub async fn recipients_for(&self, validator_id: &str) -> Result<Vec<RecipientId>> {
        let members = self.cache.set_members(&keys::subscription(validator_id)).await?;
        let subscribed = parse_recipients(&members);
        if subscribed.is_empty() {
            return Ok(self.config.default_recipients.clone());
        }
        Ok(subscribed)
    }

    pub async fn deliver(&self, alert: &Alert) -> Result<DeliveryReport> {
        let recipients = self.recipients_for(&alert.validator_id).await?;
        let text = format_alert_message(alert, self.config.details_base_url.as_deref());
        let ack_alert_id = alert.needs_acknowledgment().then_some(alert.id);
        Ok(self.fan_out(&recipients, &text, ack_alert_id).await)
    }

    /// Tells the alert's recipients who acknowledged it.
    pub async fn deliver_acknowledgment(&self, alert: &Alert) -> Result<DeliveryReport> {
        let recipients = self.recipients_for(&alert.validator_id).await?;
        let at = DateTime::from_timestamp(self.clock.unix_now(), 0)
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let who = alert.ack_by_username.as_deref().unwrap_or("user");
        let text = format!(
            "[{at}] 🚑 Alert {} for validator {} acknowledged by {who}",
            alert.id, alert.validator_id
        );
        Ok(self.fan_out(&recipients, &text, None).await)
    }

    /// Sends `text` to every global subscriber.
    pub async fn announce(&self, text: &str) -> Result<DeliveryReport> {
        let members = self.cache.set_members(keys::GLOBAL_SUBSCRIBERS).await?;
        let recipients = parse_recipients(&members);
        Ok(self
            .fan_out(&recipients, &format!("📢 Announcement:\n\n{text}"), None)
            .await)
    }

    async fn fan_out(
        &self,
        recipients: &[RecipientId],
        text: &str,
        ack_alert_id: Option<AlertId>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for &recipient in recipients {
            let message = OutboundMessage {
                recipient,
                text: text.to_string(),
                ack_alert_id,
            };
            match self.send_limited(message).await {
                Outcome::Delivered => report.delivered += 1,
                Outcome::RateLimited => report.rate_limited += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        report
    }

    async fn send_limited(&self, message: OutboundMessage) -> Outcome {
        let recipient = message.recipient;
        match self.within_rate_limit(recipient).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(recipient, "rate limit exceeded, message dropped");
                return Outcome::RateLimited;
            }
            Err(err) => {
                tracing::warn!(recipient, error = %err, "rate limit check failed, sending anyway");
            }
        }
        match self.messenger.send(message).await {
            Ok(()) => Outcome::Delivered,
            Err(err) => {
                tracing::warn!(recipient, error = %err, "failed to send message");
                Outcome::Failed
            }
        }
    }

    async fn within_rate_limit(&self, recipient: RecipientId) -> Result<bool> {
        let minute = self.clock.unix_now().div_euclid(60);
        let key = keys::rate_limit(recipient, minute);
        let count = self.cache.increment(&key).await?;
        if count == 1 {
            if let Err(err) = self.cache.expire(&key, RATE_WINDOW).await {
                tracing::warn!(key, error = %err, "failed to arm rate limit expiry");
            }
        }
        Ok(count <= self.config.rate_limit_per_minute)
    }

    /// Returns `false` when the recipient was already subscribed.
    pub async fn subscribe(
        &self,
        validator_id: &str,
        recipient: RecipientId,
    ) -> ServiceResult<bool> {
        if !is_valid_address(validator_id) {
            return Err(ServiceError::invalid(format!(
                "invalid validator address: {validator_id}"
            )));
        }
        let member = recipient.to_string();
        let added = self
            .cache
            .set_add(&keys::subscription(validator_id), &member)
            .await?;
        self.cache.set_add(keys::GLOBAL_SUBSCRIBERS, &member).await?;
        tracing::info!(validator = validator_id, recipient, added, "subscribed");
        Ok(added)
    }

    /// Returns `false` when the recipient was not subscribed.
    pub async fn unsubscribe(
        &self,
        validator_id: &str,
        recipient: RecipientId,
    ) -> ServiceResult<bool> {
        if !is_valid_address(validator_id) {
            return Err(ServiceError::invalid(format!(
                "invalid validator address: {validator_id}"
            )));
        }
        let member = recipient.to_string();
        let removed = self
            .cache
            .set_remove(&keys::subscription(validator_id), &member)
            .await?;

        let mut still_subscribed = false;
        for key in self.cache.keys_with_prefix(keys::SUBSCRIPTION_PREFIX).await? {
            if self.cache.set_contains(&key, &member).await? {
                still_subscribed = true;
                break;
            }
        }
        if !still_subscribed {
            self.cache.set_remove(keys::GLOBAL_SUBSCRIBERS, &member).await?;
        }
        tracing::info!(validator = validator_id, recipient, removed, "unsubscribed");
        Ok(removed)
    }

    pub async fn global_subscribers(&self) -> Result<Vec<RecipientId>> {
        let members = self.cache.set_members(keys::GLOBAL_SUBSCRIBERS).await?;
        Ok(parse_recipients(&members))
    }

    /// Receiver on the alert topic, for observers other than the listener.
    pub fn watch(&self) -> broadcast::Receiver<String> {
        self.topic.subscribe()
    }
}

fn parse_recipients(members: &[String]) -> Vec<RecipientId> {
    members
        .iter()
        .filter_map(|raw| match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(member = %raw, "ignoring malformed recipient id");
                None
            }
        })
        .collect()
}
