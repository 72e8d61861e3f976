//! Link shorteners: a live code redirects somewhere else

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};

use super::{is_miss_status, transport_outcome, Validator};
use crate::error::Result;
use crate::types::{DomainConfig, HitPayload, ProbeFault, ProbeOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectVerdict {
    Target(String),
    Miss,
    Unexpected(String),
}

pub struct RedirectValidator {
    client: Client,
    not_found: Vec<Regex>,
}

impl RedirectValidator {
    /// `client` must not follow redirects
    pub fn new(client: Client, not_found_patterns: &[String]) -> Result<Self> {
        let not_found = not_found_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { client, not_found })
    }

    /// Classify a response from its status and `Location` header.
    ///
    /// Redirects back to the service's own front page, or to anything matching
    /// a not-found pattern, are how shorteners answer unknown codes.
    pub fn classify(&self, request_url: &str, status: u16, location: Option<&str>) -> RedirectVerdict {
        match status {
            301 | 302 | 303 | 307 | 308 => {
                let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) else {
                    return RedirectVerdict::Unexpected(format!("HTTP {} without Location", status));
                };

                let target = match Url::parse(request_url).and_then(|base| base.join(location)) {
                    Ok(target) => target,
                    Err(e) => {
                        return RedirectVerdict::Unexpected(format!(
                            "Unparseable Location {:?}: {}",
                            location, e
                        ))
                    }
                };

                if self.not_found.iter().any(|re| re.is_match(target.as_str())) {
                    return RedirectVerdict::Miss;
                }
                if is_service_root(request_url, &target) {
                    return RedirectVerdict::Miss;
                }
                RedirectVerdict::Target(target.to_string())
            }
            200 => RedirectVerdict::Miss,
            s if is_miss_status(s) => RedirectVerdict::Miss,
            s => RedirectVerdict::Unexpected(format!("HTTP {}", s)),
        }
    }
}

fn is_service_root(request_url: &str, target: &Url) -> bool {
    let Ok(request) = Url::parse(request_url) else {
        return false;
    };

    let same_site = match (request.host_str(), target.host_str()) {
        (Some(a), Some(b)) => {
            let a = a.trim_start_matches("www.");
            let b = b.trim_start_matches("www.");
            a.eq_ignore_ascii_case(b)
        }
        _ => false,
    };

    same_site && matches!(target.path(), "" | "/") && target.query().is_none()
}

#[async_trait]
impl Validator for RedirectValidator {
    async fn validate(&self, _domain: &DomainConfig, url: &str, _code: &str) -> ProbeOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return transport_outcome(e),
        };

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok());

        match self.classify(url, status, location) {
            RedirectVerdict::Target(target) => ProbeOutcome::Hit(HitPayload {
                media: None,
                resolved_url: Some(target),
            }),
            RedirectVerdict::Miss => ProbeOutcome::Miss,
            RedirectVerdict::Unexpected(message) => ProbeOutcome::Error(ProbeFault::new(message)),
        }
    }

    fn name(&self) -> &'static str {
        "redirect"
    }
}
