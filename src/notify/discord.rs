//! Discord delivery via bot token + channel or a webhook

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::Notifier;
use crate::config::DiscordConfig;
use crate::error::{ProbeError, Result};
use crate::types::Discovery;

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord rejects uploads above this on unboosted servers
const MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone)]
enum Target {
    Webhook(String),
    Channel { token: String, channel_id: u64 },
}

pub struct DiscordNotifier {
    client: Client,
    target: Target,
}

impl DiscordNotifier {
    pub fn from_config(config: &DiscordConfig) -> Result<Self> {
        let target = match (&config.webhook_url, &config.token, config.channel_id) {
            (Some(url), _, _) => Target::Webhook(url.clone()),
            (None, Some(token), Some(channel_id)) => Target::Channel {
                token: token.clone(),
                channel_id,
            },
            _ => {
                return Err(ProbeError::config(
                    "Discord needs either webhook_url or both token and channel_id",
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("linkprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::config(format!("Failed to create Discord client: {}", e)))?;

        Ok(Self { client, target })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        match &self.target {
            Target::Webhook(url) => self.client.post(url),
            Target::Channel { token, channel_id } => self
                .client
                .post(format!("{}/channels/{}/messages", API_BASE, channel_id))
                .header(reqwest::header::AUTHORIZATION, format!("Bot {}", token)),
        }
    }

    async fn send(&self, discovery: &Discovery) -> Result<()> {
        let content = discovery
            .caption
            .clone()
            .unwrap_or_else(|| discovery.url.clone());

        let attachment = discovery
            .payload
            .media
            .as_ref()
            .filter(|m| m.bytes.len() <= MAX_ATTACHMENT_BYTES);

        let request = match attachment {
            Some(media) => {
                let file_name = media.file_name();
                let mut payload = json!({ "content": content });
                if media.is_image() {
                    payload["embeds"] = json!([{
                        "url": discovery.url,
                        "image": { "url": format!("attachment://{}", file_name) },
                    }]);
                }

                let part = Part::bytes(media.bytes.clone())
                    .file_name(file_name)
                    .mime_str(&media.content_type)
                    .map_err(|e| ProbeError::internal(format!("Bad media type: {}", e)))?;

                let form = Form::new()
                    .text("payload_json", payload.to_string())
                    .part("files[0]", part);
                self.request().multipart(form)
            }
            None => self.request().json(&json!({ "content": content })),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProbeError::network(
                format!("Discord rejected message: {}", body),
                Some(status.as_u16()),
                None,
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, discovery: &Discovery) {
        if let Err(e) = self.send(discovery).await {
            tracing::warn!(url = %discovery.url, error = %e, "Discord notification failed");
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}
