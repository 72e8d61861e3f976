//! Validator dispatch
//!
//! A validator turns a full URL into a [`ProbeOutcome`]. Everything
//! site-specific lives behind this trait; the probing core only sees typed
//! outcomes. Validators never return errors: transport trouble is a miss,
//! anything else they cannot interpret is [`ProbeOutcome::Error`].

pub mod image;
pub mod page;
pub mod redirect;

pub use image::ImageValidator;
pub use page::PageValidator;
pub use redirect::RedirectValidator;

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProbeError, Result};
use crate::types::{DomainConfig, DomainId, ProbeFault, ProbeOutcome, ValidatorKind};

/// Browser-like user agent; several hosts refuse obvious bots
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Site-specific probe
#[async_trait]
pub trait Validator: Send + Sync {
    /// Probe one identifier. Must not panic and must map every fault to an outcome.
    async fn validate(&self, domain: &DomainConfig, url: &str, code: &str) -> ProbeOutcome;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Validators resolved once per domain at config load
#[derive(Default, Clone)]
pub struct ValidatorRegistry {
    validators: HashMap<DomainId, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one validator per configured domain from its `validator` section
    pub fn from_domains(domains: &[DomainConfig], request_timeout: Duration) -> Result<Self> {
        let following = http_client(request_timeout, true)?;
        let non_following = http_client(request_timeout, false)?;

        let mut registry = Self::new();
        for (idx, domain) in domains.iter().enumerate() {
            let validator: Arc<dyn Validator> = match &domain.validator {
                ValidatorKind::Image { max_media_bytes } => {
                    Arc::new(ImageValidator::new(following.clone(), *max_media_bytes))
                }
                ValidatorKind::Redirect { not_found_patterns } => Arc::new(
                    RedirectValidator::new(non_following.clone(), not_found_patterns)?,
                ),
                ValidatorKind::Page {
                    miss_markers,
                    media_pattern,
                } => Arc::new(PageValidator::new(
                    following.clone(),
                    miss_markers,
                    media_pattern.as_deref(),
                )?),
            };

            tracing::debug!(
                domain = %domain.name,
                validator = validator.name(),
                "Validator registered"
            );
            registry.insert(DomainId(idx), validator);
        }

        Ok(registry)
    }

    pub fn insert(&mut self, domain: DomainId, validator: Arc<dyn Validator>) {
        self.validators.insert(domain, validator);
    }

    pub fn get(&self, domain: DomainId) -> Option<Arc<dyn Validator>> {
        self.validators.get(&domain).cloned()
    }

    /// Fail unless every one of `count` domains has a validator
    pub fn ensure_complete(&self, count: usize) -> Result<()> {
        match (0..count).find(|idx| !self.validators.contains_key(&DomainId(*idx))) {
            Some(missing) => Err(ProbeError::config(format!(
                "No validator registered for domain {}",
                DomainId(missing)
            ))),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

/// Shared HTTP client for validators
pub fn http_client(timeout: Duration, follow_redirects: bool) -> Result<Client> {
    let policy = if follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(policy)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| ProbeError::config(format!("Failed to create HTTP client: {}", e)))
}

/// Map a transport error: timeouts and connection trouble are misses,
/// anything else is an indeterminate fault.
pub(crate) fn transport_outcome(err: reqwest::Error) -> ProbeOutcome {
    let err = ProbeError::from(err);
    if err.is_transient() {
        ProbeOutcome::Miss
    } else {
        ProbeOutcome::Error(ProbeFault::new(err.to_string()))
    }
}

/// Read a body chunk by chunk up to `max_bytes`; `None` if it is larger.
/// Stops reading as soon as the cap is crossed, chunked bodies included.
pub(crate) async fn read_capped(
    mut response: reqwest::Response,
    max_bytes: usize,
) -> std::result::Result<Option<Vec<u8>>, reqwest::Error> {
    if response
        .content_length()
        .is_some_and(|len| len as usize > max_bytes)
    {
        return Ok(None);
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if bytes.len() + chunk.len() > max_bytes {
            return Ok(None);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(Some(bytes))
}

/// Status codes every HTTP validator treats as "nothing here (right now)"
pub(crate) fn is_miss_status(status: u16) -> bool {
    matches!(status, 404 | 410 | 429 | 500..=599)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(ProbeOutcome);

    #[async_trait]
    impl Validator for Always {
        async fn validate(&self, _: &DomainConfig, _: &str, _: &str) -> ProbeOutcome {
            self.0.clone()
        }

        fn name(&self) -> &'static str {
            "always"
        }
    }

    #[test]
    fn test_registry_from_domains() {
        let mut redirect = DomainConfig::new("sho.rt", "https://sho.rt/");
        redirect.validator = ValidatorKind::Redirect {
            not_found_patterns: vec!["/error".to_string()],
        };
        let domains = vec![DomainConfig::new("img", "https://i.img/"), redirect];

        let registry = ValidatorRegistry::from_domains(&domains, Duration::from_secs(5)).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(DomainId(0)).unwrap().name(), "image");
        assert_eq!(registry.get(DomainId(1)).unwrap().name(), "redirect");
        assert!(registry.ensure_complete(2).is_ok());
        assert!(registry.ensure_complete(3).is_err());
    }

    #[tokio::test]
    async fn test_custom_validator() {
        let mut registry = ValidatorRegistry::new();
        registry.insert(DomainId(0), Arc::new(Always(ProbeOutcome::Miss)));
        let validator = registry.get(DomainId(0)).unwrap();
        let domain = DomainConfig::new("x", "https://x/");
        assert_eq!(validator.validate(&domain, "https://x/a", "a").await, ProbeOutcome::Miss);
    }

    #[test]
    fn test_miss_statuses() {
        assert!(is_miss_status(404));
        assert!(is_miss_status(503));
        assert!(is_miss_status(429));
        assert!(!is_miss_status(200));
        assert!(!is_miss_status(403));
    }
}
