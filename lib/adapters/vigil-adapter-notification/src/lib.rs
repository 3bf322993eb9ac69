//! Outbound chat delivery.

pub mod logged;
pub mod telegram;

use std::sync::Arc;

use anyhow::Result;

use vigil_domain::NotificationsConfig;
use vigil_ports::MessengerPort;

pub use logged::LogMessenger;
pub use telegram::TelegramMessenger;

/// Telegram when a bot token is configured, otherwise messages only go to the log.
pub fn messenger_from_config(config: &NotificationsConfig) -> Result<Arc<dyn MessengerPort>> {
    match config.telegram_token.as_deref().filter(|token| !token.is_empty()) {
        Some(token) => Ok(Arc::new(TelegramMessenger::new(
            config.telegram_api_url.clone(),
            token.to_string(),
        )?)),
        None => {
            tracing::warn!("no telegram token configured, alerts will only be logged");
            Ok(Arc::new(LogMessenger::default()))
        }
    }
}
