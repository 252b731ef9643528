//! Notification sink
//!
//! Delivery is best-effort: failures are logged and never change the
//! cycle outcome.

use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::NotifyConfig;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Deliver and swallow any failure
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send(text).await {
        warn!("Notification failed: {}", e);
    }
}

/// Writes the summary to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        info!("Cycle summary\n{}", text);
        Ok(())
    }
}

/// Telegram Bot API `sendMessage`
pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, token: &str, chat_id: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Configured when both token and chat id are present
    pub fn from_config(cfg: &NotifyConfig) -> anyhow::Result<Option<Self>> {
        match (&cfg.telegram_token, &cfg.telegram_chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                Ok(Some(Self::new(&cfg.telegram_api_url, token, chat_id)?))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let resp = self.client.post(&url).json(&payload).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("telegram returned HTTP {}", resp.status());
        }
        Ok(())
    }
}

/// Log plus Telegram when configured
pub struct CompositeNotifier {
    sinks: Vec<Box<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn from_config(cfg: &NotifyConfig) -> anyhow::Result<Self> {
        let mut sinks: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        if let Some(telegram) = TelegramNotifier::from_config(cfg)? {
            sinks.push(Box::new(telegram));
        }
        Ok(Self { sinks })
    }
}

#[async_trait::async_trait]
impl Notifier for CompositeNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        for sink in &self.sinks {
            notify_best_effort(sink.as_ref(), text).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_telegram_posts_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(serde_json::json!({"chat_id": "42", "text": "hello"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(&server.uri(), "TOKEN", "42").unwrap();
        notifier.send("hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(&server.uri(), "TOKEN", "42").unwrap();
        assert!(notifier.send("hello").await.is_err());
        notify_best_effort(&notifier, "hello").await;
    }

    #[test]
    fn test_log_notifier_never_fails() {
        assert!(tokio_test::block_on(LogNotifier.send("pool: hold:already_held")).is_ok());
    }

    #[test]
    fn test_telegram_needs_token_and_chat() {
        let cfg = NotifyConfig {
            telegram_token: Some("t".to_string()),
            ..Default::default()
        };
        assert!(TelegramNotifier::from_config(&cfg).unwrap().is_none());
    }
}
