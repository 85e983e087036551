//! Best-effort link previews from Open Graph metadata.

use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::{Url, header};
use tracing::warn;

use huddle_types::models::LinkPreview;

/// Previews are only fetched for the first few links in a message.
pub const MAX_PREVIEWS: usize = 3;

/// Bytes of a page read while looking for metadata.
pub const MAX_BODY_BYTES: usize = 512 * 1024;

const MAX_REDIRECTS: usize = 5;

static URL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).ok());
static TITLE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>([^<]*)</title>").ok());
static META_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<meta[^>]*\b(property|name)=["'](og:)?(title|description|image)["'][^>]*content=["']([^"']*)["']"#,
    )
    .ok()
});

#[async_trait]
pub trait LinkUnfurler: Send + Sync {
    /// Fetch a preview for `url`. Failures are swallowed.
    async fn fetch_preview(&self, url: &str) -> Option<LinkPreview>;
}

/// Fetches pages over HTTP. Only public hosts are contacted, redirects are
/// followed by hand so every hop is checked, and at most
/// [`MAX_BODY_BYTES`] of a body is read.
pub struct HttpUnfurler {
    client: reqwest::Client,
}

impl HttpUnfurler {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &str) -> Result<String> {
        let mut target = Url::parse(url)?;
        for _ in 0..=MAX_REDIRECTS {
            ensure_public(&target).await?;

            let response = self.client.get(target.clone()).send().await?;
            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| anyhow!("redirect without a location"))?;
                target = target.join(location)?;
                continue;
            }
            if !response.status().is_success() {
                bail!("status {}", response.status());
            }
            return read_capped(response).await;
        }
        bail!("more than {MAX_REDIRECTS} redirects")
    }
}

#[async_trait]
impl LinkUnfurler for HttpUnfurler {
    async fn fetch_preview(&self, url: &str) -> Option<LinkPreview> {
        match self.fetch_html(url).await {
            Ok(html) => parse_preview(url, &html),
            Err(e) => {
                warn!("Unfurl of {} failed: {:#}", url, e);
                None
            }
        }
    }
}

/// Read a body up to [`MAX_BODY_BYTES`]. A declared length above the cap is
/// refused outright; an undeclared one is cut off at the cap, which still
/// leaves the `<head>` where the metadata lives.
async fn read_capped(response: reqwest::Response) -> Result<String> {
    if let Some(len) = response.content_length() {
        if len > MAX_BODY_BYTES as u64 {
            bail!("body of {len} bytes is too large");
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let room = MAX_BODY_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() == MAX_BODY_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Refuse anything but http(s) on a host that resolves only to public
/// addresses.
async fn ensure_public(url: &Url) -> Result<()> {
    if !matches!(url.scheme(), "http" | "https") {
        bail!("unsupported scheme {}", url.scheme());
    }
    let host = url.host_str().context("url has no host")?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        if !is_public(ip) {
            bail!("{ip} is not a public address");
        }
        return Ok(());
    }

    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered.ends_with(".localhost") {
        bail!("{host} is a local name");
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let mut resolved = false;
    for addr in tokio::net::lookup_host((host, port)).await? {
        if !is_public(addr.ip()) {
            bail!("{host} resolves to non-public {}", addr.ip());
        }
        resolved = true;
    }
    if !resolved {
        bail!("{host} did not resolve");
    }
    Ok(())
}

fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_multicast()
                || v4.is_documentation()
                || a == 0
                // Carrier-grade NAT, 100.64.0.0/10.
                || (a == 100 && (b & 0xc0) == 64))
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_public(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // Unique local fc00::/7 and link-local fe80::/10.
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

/// Never fetches anything.
pub struct NoopUnfurler;

#[async_trait]
impl LinkUnfurler for NoopUnfurler {
    async fn fetch_preview(&self, _url: &str) -> Option<LinkPreview> {
        None
    }
}

/// Distinct http(s) links in `text`, in order of appearance, at most `max`.
pub fn extract_urls(text: &str, max: usize) -> Vec<String> {
    let Some(re) = URL_RE.as_ref() else {
        return Vec::new();
    };

    let mut urls: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
        if urls.len() == max {
            break;
        }
    }
    urls
}

/// Build a preview from a page's `og:` meta tags, falling back to plain
/// `name=` meta tags and the `<title>` element. `None` when the page has
/// nothing usable.
pub fn parse_preview(url: &str, html: &str) -> Option<LinkPreview> {
    let title = meta(html, "title").or_else(|| {
        TITLE_RE
            .as_ref()?
            .captures(html)
            .map(|c| c[1].trim().to_string())
            .filter(|t| !t.is_empty())
    });
    let description = meta(html, "description");
    let image_url = meta(html, "image");

    if title.is_none() && description.is_none() && image_url.is_none() {
        return None;
    }

    Some(LinkPreview {
        url: url.to_string(),
        title,
        description,
        image_url,
    })
}

/// Content of the `og:<key>` meta tag, or failing that a `name=` tag.
fn meta(html: &str, key: &str) -> Option<String> {
    let re = META_RE.as_ref()?;
    let mut best: Option<(u8, String)> = None;
    for c in re.captures_iter(html) {
        if !c[3].eq_ignore_ascii_case(key) {
            continue;
        }
        let rank = match (c[1].eq_ignore_ascii_case("property"), c.get(2).is_some()) {
            (true, true) => 0,
            (false, _) => 1,
            (true, false) => continue,
        };
        let value = c[4].trim();
        if value.is_empty() {
            continue;
        }
        if best.as_ref().is_none_or(|(r, _)| rank < *r) {
            best = Some((rank, value.to_string()));
        }
    }
    best.map(|(_, value)| value)
}
