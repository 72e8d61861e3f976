//! Share pages: a live code renders a page, a dead one renders a placeholder

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use super::{is_miss_status, read_capped, transport_outcome, Validator};
use crate::error::Result;
use crate::types::{DomainConfig, HitPayload, ProbeFault, ProbeOutcome};

/// Largest page body inspected
const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageVerdict {
    Live { media_url: Option<String> },
    Miss,
    Unexpected(String),
}

pub struct PageValidator {
    client: Client,
    miss_markers: Vec<Regex>,
    media_pattern: Option<Regex>,
}

impl PageValidator {
    pub fn new(client: Client, miss_markers: &[String], media_pattern: Option<&str>) -> Result<Self> {
        let miss_markers = miss_markers
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let media_pattern = media_pattern.map(Regex::new).transpose()?;

        Ok(Self {
            client,
            miss_markers,
            media_pattern,
        })
    }

    /// Classify a fetched page.
    ///
    /// The media pattern only enriches a hit; a live page without it is
    /// still a hit.
    pub fn classify(&self, status: u16, body: &str) -> PageVerdict {
        if status != 200 {
            return if is_miss_status(status) {
                PageVerdict::Miss
            } else {
                PageVerdict::Unexpected(format!("HTTP {}", status))
            };
        }

        if self.miss_markers.iter().any(|re| re.is_match(body)) {
            return PageVerdict::Miss;
        }

        let media_url = self.media_pattern.as_ref().and_then(|re| {
            let caps = re.captures(body)?;
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| html_unescape(m.as_str()))
        });
        PageVerdict::Live { media_url }
    }
}

/// The handful of entities that show up inside attribute values
fn html_unescape(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

#[async_trait]
impl Validator for PageValidator {
    async fn validate(&self, _domain: &DomainConfig, url: &str, _code: &str) -> ProbeOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return transport_outcome(e),
        };

        // Only a 200 page body is ever inspected
        let status = response.status().as_u16();
        let body = if status == 200 {
            match read_capped(response, MAX_PAGE_BYTES).await {
                Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                Ok(None) => return ProbeOutcome::Error(ProbeFault::new("Page too large to inspect")),
                Err(e) => return transport_outcome(e),
            }
        } else {
            String::new()
        };

        match self.classify(status, &body) {
            PageVerdict::Live { media_url } => ProbeOutcome::Hit(HitPayload {
                media: None,
                resolved_url: media_url,
            }),
            PageVerdict::Miss => ProbeOutcome::Miss,
            PageVerdict::Unexpected(message) => ProbeOutcome::Error(ProbeFault::new(message)),
        }
    }

    fn name(&self) -> &'static str {
        "page"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVE_PAGE: &str = r#"<html><head>
<meta property="og:image" content="https://image.host/abc/def.png?a=1&amp;b=2"/>
<title>Screenshot</title></head><body><img id="screenshot-image" src="https://image.host/abc/def.png"></body></html>"#;

    const DEAD_PAGE: &str = r#"<html><head>
<meta property="og:image" content="//st.host/img/0_173a7b_211be8ff.png"/>
</head><body>The screenshot was removed</body></html>"#;

    const BARE_PAGE: &str = "<html><body><pre>hello world</pre></body></html>";

    fn validator() -> PageValidator {
        PageValidator::new(
            Client::new(),
            &["0_173a7b_211be8ff".to_string(), "screenshot was removed".to_string()],
            Some(r#"<meta property="og:image" content="([^"]+)""#),
        )
        .unwrap()
    }

    #[test]
    fn test_live_page_is_hit_with_media() {
        assert_eq!(
            validator().classify(200, LIVE_PAGE),
            PageVerdict::Live {
                media_url: Some("https://image.host/abc/def.png?a=1&b=2".to_string())
            }
        );
    }

    #[test]
    fn test_placeholder_page_is_miss() {
        assert_eq!(validator().classify(200, DEAD_PAGE), PageVerdict::Miss);
    }

    #[test]
    fn test_live_page_without_media_still_hits() {
        assert_eq!(validator().classify(200, BARE_PAGE), PageVerdict::Live { media_url: None });
    }

    #[test]
    fn test_without_media_pattern_any_live_page_hits() {
        let v = PageValidator::new(Client::new(), &["not found".to_string()], None).unwrap();
        assert_eq!(v.classify(200, LIVE_PAGE), PageVerdict::Live { media_url: None });
        assert_eq!(v.classify(200, "<h1>Paste not found</h1>"), PageVerdict::Miss);
    }

    #[test]
    fn test_status_handling() {
        assert_eq!(validator().classify(404, ""), PageVerdict::Miss);
        assert!(matches!(validator().classify(401, ""), PageVerdict::Unexpected(_)));
    }

    /// Serve one chunked 200 response of `chunks` x `chunk_size` bytes of `fill`
    async fn serve_chunked(fill: u8, chunk_size: usize, chunks: usize) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;

            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ntransfer-encoding: chunked\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let chunk = vec![fill; chunk_size];
            for _ in 0..chunks {
                let mut frame = format!("{:x}\r\n", chunk_size).into_bytes();
                frame.extend_from_slice(&chunk);
                frame.extend_from_slice(b"\r\n");
                // The client hangs up once it has read enough
                if socket.write_all(&frame).await.is_err() {
                    return;
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });
        format!("http://{}/abc123", addr)
    }

    fn local_validator() -> PageValidator {
        let client = Client::builder().no_proxy().build().unwrap();
        PageValidator::new(client, &["screenshot was removed".to_string()], None).unwrap()
    }

    #[tokio::test]
    async fn test_oversized_chunked_page_is_not_buffered() {
        let chunk_size = 64 * 1024;
        let url = serve_chunked(b'a', chunk_size, MAX_PAGE_BYTES / chunk_size + 4).await;
        let domain = DomainConfig::new("p", "http://p/");

        let outcome = local_validator().validate(&domain, &url, "abc123").await;
        assert!(matches!(outcome, ProbeOutcome::Error(_)));
    }

    #[tokio::test]
    async fn test_small_chunked_page_is_inspected() {
        let url = serve_chunked(b'a', 1024, 3).await;
        let domain = DomainConfig::new("p", "http://p/");

        let outcome = local_validator().validate(&domain, &url, "abc123").await;
        assert!(outcome.is_hit());
    }
}
