//! Core types and structures for linkprobe

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Index of a configured domain, stable for the lifetime of a loaded config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(pub usize);

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Built-in alphabets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlphabetPreset {
    /// a-z
    Lowercase,
    /// a-z, 0-9
    Lowernum,
    /// a-z, A-Z, 0-9
    Alphanumeric,
    /// 0-9
    Digits,
    /// 0-9, a-f
    Hex,
    /// Emoticons block (U+1F600..U+1F64F)
    Emoji,
}

impl std::fmt::Display for AlphabetPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlphabetPreset::Lowercase => write!(f, "lowercase"),
            AlphabetPreset::Lowernum => write!(f, "lowernum"),
            AlphabetPreset::Alphanumeric => write!(f, "alphanumeric"),
            AlphabetPreset::Digits => write!(f, "digits"),
            AlphabetPreset::Hex => write!(f, "hex"),
            AlphabetPreset::Emoji => write!(f, "emoji"),
        }
    }
}

/// Alphabet as written in the config: a preset name or an explicit symbol list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlphabetSpec {
    Preset(AlphabetPreset),
    /// Every char of the string is one symbol
    Custom { custom: String },
    /// Multi-char symbols (e.g. emoji sequences)
    Symbols { symbols: Vec<String> },
}

/// Code length: a single fixed length or a set of allowed lengths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeLength {
    Fixed(usize),
    Set(Vec<usize>),
}

impl CodeLength {
    pub fn values(&self) -> Vec<usize> {
        match self {
            CodeLength::Fixed(n) => vec![*n],
            CodeLength::Set(set) => set.clone(),
        }
    }
}

impl Default for CodeLength {
    fn default() -> Self {
        Self::Fixed(6)
    }
}

/// How a domain's probes are judged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ValidatorKind {
    /// 200 with an image content type is a hit
    Image {
        #[serde(default = "default_max_media_bytes")]
        max_media_bytes: usize,
    },
    /// A redirect to somewhere other than the service itself is a hit
    Redirect {
        #[serde(default)]
        not_found_patterns: Vec<String>,
    },
    /// A 200 page that matches none of the miss markers is a hit
    Page {
        #[serde(default)]
        miss_markers: Vec<String>,
        #[serde(default)]
        media_pattern: Option<String>,
    },
}

fn default_max_media_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for ValidatorKind {
    fn default() -> Self {
        Self::Image {
            max_media_bytes: default_max_media_bytes(),
        }
    }
}

impl std::fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidatorKind::Image { .. } => write!(f, "image"),
            ValidatorKind::Redirect { .. } => write!(f, "redirect"),
            ValidatorKind::Page { .. } => write!(f, "page"),
        }
    }
}

/// One probing target. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Hostname-style name, used as the key in persisted stats
    pub name: String,
    /// Prefix the code is appended to, e.g. `https://i.example.bio/`
    pub base_url: String,
    #[serde(default)]
    pub length: CodeLength,
    #[serde(default)]
    pub alphabet: Option<AlphabetSpec>,
    /// Pause after each probe of this domain
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Path suffixes, one picked per probe (e.g. `.png`)
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub initial_weight: Option<f64>,
    #[serde(default)]
    pub validator: ValidatorKind,
}

fn default_interval_ms() -> u64 {
    1000
}

impl DomainConfig {
    /// Minimal config for a domain, mostly useful in tests
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            length: CodeLength::default(),
            alphabet: None,
            interval_ms: default_interval_ms(),
            extensions: Vec::new(),
            initial_weight: None,
            validator: ValidatorKind::default(),
        }
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.length.values()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Full identifier for a code: base URL + code + optional extension
    pub fn full_url(&self, code: &str, extension: Option<&str>) -> String {
        format!("{}{}{}", self.base_url, code, extension.unwrap_or(""))
    }

    /// Host part of the base URL, lowercased
    pub fn host(&self) -> String {
        let without_scheme = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        without_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or("")
            .to_lowercase()
    }
}

/// Media fetched alongside a hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Media {
    /// File name to attach the media as, derived from its content type
    pub fn file_name(&self) -> String {
        let ext = self
            .content_type
            .split(';')
            .next()
            .and_then(|mime| mime.split('/').nth(1))
            .map(|sub| sub.trim().trim_start_matches("x-"))
            .filter(|sub| !sub.is_empty())
            .unwrap_or("bin");
        let ext = if ext == "jpeg" { "jpg" } else { ext };
        format!("media.{}", ext)
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Optional data a validator attaches to a hit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitPayload {
    pub media: Option<Media>,
    /// Where the identifier resolves to, for redirects and page scrapes
    pub resolved_url: Option<String>,
}

/// A fault the validator could not map to hit or miss
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFault {
    pub message: String,
    /// The validator's shared session is unusable; the pool must restart
    pub fatal: bool,
}

impl ProbeFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Result of probing one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Hit(HitPayload),
    Miss,
    Error(ProbeFault),
}

impl ProbeOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, ProbeOutcome::Hit(_))
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Hit(_) => write!(f, "hit"),
            ProbeOutcome::Miss => write!(f, "miss"),
            ProbeOutcome::Error(_) => write!(f, "error"),
        }
    }
}

/// A confirmed live identifier, handed to notifiers
#[derive(Debug, Clone)]
pub struct Discovery {
    pub domain: String,
    pub url: String,
    pub code: String,
    pub payload: HitPayload,
    pub caption: Option<String>,
    pub found_at: DateTime<Utc>,
}

/// Live counters for a running pool
#[derive(Debug, Default)]
pub struct PoolMetrics {
    probes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    collisions: AtomicU64,
    checkpoints: AtomicU64,
    notifications: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: &ProbeOutcome) {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ProbeOutcome::Hit(_) => &self.hits,
            ProbeOutcome::Miss => &self.misses,
            ProbeOutcome::Error(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_collisions(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checkpoints(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifications(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            probes: self.probes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PoolMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub probes: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub collisions: u64,
    pub checkpoints: u64,
    pub notifications: u64,
}

impl MetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.probes == 0 {
            0.0
        } else {
            self.hits as f64 / self.probes as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.probes == 0 {
            0.0
        } else {
            self.errors as f64 / self.probes as f64
        }
    }
}
