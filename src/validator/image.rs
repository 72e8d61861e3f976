//! Direct media URLs: a live code serves an image

use async_trait::async_trait;
use reqwest::Client;

use super::{is_miss_status, read_capped, transport_outcome, Validator};
use crate::types::{DomainConfig, HitPayload, Media, ProbeFault, ProbeOutcome};

/// Verdict from status line and headers alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageVerdict {
    Image,
    Miss,
    Unexpected(String),
}

/// Classify a response before reading its body
pub fn classify(status: u16, content_type: Option<&str>) -> ImageVerdict {
    if status == 200 {
        return match content_type {
            Some(ct) if ct.trim().to_lowercase().starts_with("image/") => ImageVerdict::Image,
            // Hosts answer unknown codes with an HTML placeholder page
            _ => ImageVerdict::Miss,
        };
    }

    if is_miss_status(status) {
        ImageVerdict::Miss
    } else {
        ImageVerdict::Unexpected(format!("HTTP {}", status))
    }
}

pub struct ImageValidator {
    client: Client,
    max_media_bytes: usize,
}

impl ImageValidator {
    pub fn new(client: Client, max_media_bytes: usize) -> Self {
        Self {
            client,
            max_media_bytes,
        }
    }
}

#[async_trait]
impl Validator for ImageValidator {
    async fn validate(&self, _domain: &DomainConfig, url: &str, _code: &str) -> ProbeOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return transport_outcome(e),
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match classify(status, content_type.as_deref()) {
            ImageVerdict::Miss => ProbeOutcome::Miss,
            ImageVerdict::Unexpected(message) => ProbeOutcome::Error(ProbeFault::new(message)),
            ImageVerdict::Image => {
                let final_url = response.url().to_string();
                let media = match read_capped(response, self.max_media_bytes).await {
                    Ok(Some(bytes)) if !bytes.is_empty() => Some(Media {
                        bytes,
                        content_type: content_type.unwrap_or_default(),
                    }),
                    Ok(Some(_)) => return ProbeOutcome::Miss,
                    Ok(None) => {
                        tracing::debug!(url = %url, "Image larger than media cap, not attached");
                        None
                    }
                    Err(e) => return transport_outcome(e),
                };

                ProbeOutcome::Hit(HitPayload {
                    media,
                    resolved_url: (final_url != url).then_some(final_url),
                })
            }
        }
    }

    fn name(&self) -> &'static str {
        "image"
    }
}
