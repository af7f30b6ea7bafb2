//! Telegram Bot API delivery.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use log::debug;
use log::info;
use serde::Serialize;
use serde_json::Value;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

use crate::delivery::DeliveryChannel;
use crate::delivery::error::DeliveryError;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

pub struct TelegramChannel {
    pub api_url: String,
    token: String,
    client: reqwest::Client,
    timeout: Duration,
    limiter: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
}

impl TelegramChannel {
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().build()?;

        // Bot API broadcast limit is about 30 messages per second.
        let limiter = RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(25).unwrap_or(NonZeroU32::MIN),
        ));

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
            timeout,
            limiter,
        })
    }

    async fn post_message(&self, target: &str, text: &str) -> Result<(), DeliveryError> {
        if self.limiter.check().is_err() {
            info!("Telegram delivery is ratelimited. Waiting...");
        }
        self.limiter.until_ready().await;

        let payload = SendMessage {
            chat_id: target,
            text,
            parse_mode: "MarkdownV2",
        };
        let request = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_url, self.token))
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_string(&payload)?)
            .build()?;
        debug!("Sending message to chat {}", target);

        let response = self.client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;
        let resp: Option<Value> = serde_json::from_str(&body).ok();
        let ok = resp
            .as_ref()
            .and_then(|v| v.get("ok"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if status.is_success() && ok {
            return Ok(());
        }

        let description = resp
            .as_ref()
            .and_then(|v| v.get("description"))
            .and_then(|v| v.as_str())
            .unwrap_or("no description")
            .to_string();
        Err(DeliveryError::Rejected {
            target: target.to_string(),
            status: status.as_u16(),
            description,
        })
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send(&self, target: &str, text: &str) -> Result<(), DeliveryError> {
        tokio::time::timeout(self.timeout, self.post_message(target, text))
            .await
            .map_err(|_| DeliveryError::TimedOut(self.timeout))?
    }
}
