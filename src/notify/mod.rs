//! Discovery notifiers
//!
//! Notifiers are best-effort: they log their own failures and never hand an
//! error back to the worker that found the discovery.

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(feature = "discord")]
pub use discord::DiscordNotifier;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::config::{NotifyConfig, StorageConfig};
use crate::error::Result;
use crate::types::Discovery;

/// Sink for discoveries
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, discovery: &Discovery);

    fn name(&self) -> &'static str;
}

/// Build the configured set of sinks
pub fn from_config(notify: &NotifyConfig, storage: &StorageConfig) -> Result<Arc<dyn Notifier>> {
    let mut sinks: Vec<Arc<dyn Notifier>> = Vec::new();

    if notify.log {
        sinks.push(Arc::new(LogNotifier));
    }
    if notify.file {
        sinks.push(Arc::new(FileNotifier::new(storage.discoveries_path())));
    }

    if let Some(discord) = notify.discord.as_ref().filter(|d| d.is_configured()) {
        #[cfg(feature = "discord")]
        sinks.push(Arc::new(DiscordNotifier::from_config(discord)?));

        #[cfg(not(feature = "discord"))]
        {
            let _ = discord;
            tracing::warn!("Discord configured but linkprobe was built without the discord feature");
        }
    }

    Ok(Arc::new(FanoutNotifier::new(sinks)))
}

/// Logs each discovery at info level
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, discovery: &Discovery) {
        tracing::info!(
            domain = %discovery.domain,
            url = %discovery.url,
            resolved = discovery.payload.resolved_url.as_deref().unwrap_or(""),
            media_bytes = discovery.payload.media.as_ref().map(|m| m.bytes.len()).unwrap_or(0),
            "Discovery"
        );
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// One line of the discoveries file
#[derive(Debug, Serialize)]
struct DiscoveryRecord<'a> {
    domain: &'a str,
    url: &'a str,
    code: &'a str,
    resolved_url: Option<&'a str>,
    content_type: Option<&'a str>,
    media_bytes: Option<usize>,
    found_at: DateTime<Utc>,
}

/// Appends each discovery as a JSON line
pub struct FileNotifier {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileNotifier {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn append(&self, line: String) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    async fn notify(&self, discovery: &Discovery) {
        let media = discovery.payload.media.as_ref();
        let record = DiscoveryRecord {
            domain: &discovery.domain,
            url: &discovery.url,
            code: &discovery.code,
            resolved_url: discovery.payload.resolved_url.as_deref(),
            content_type: media.map(|m| m.content_type.as_str()),
            media_bytes: media.map(|m| m.bytes.len()),
            found_at: discovery.found_at,
        };

        let line = match serde_json::to_string(&record) {
            Ok(json) => format!("{}\n", json),
            Err(e) => {
                tracing::warn!(url = %discovery.url, error = %e, "Failed to encode discovery");
                return;
            }
        };

        if let Err(e) = self.append(line).await {
            tracing::warn!(
                path = %self.path.display(),
                url = %discovery.url,
                error = %e,
                "Failed to record discovery"
            );
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Delivers to every inner sink concurrently
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, discovery: &Discovery) {
        join_all(self.sinks.iter().map(|sink| sink.notify(discovery))).await;
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}
