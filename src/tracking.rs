use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::{header, Method, StatusCode, Url};

use crate::core::Core;
use crate::model::ProbabilityModel;

// Value of the Server header that identifies a genuine platform tracking
// endpoint; the platform rejects OPTIONS but still identifies itself.
const TRACKING_SERVER: &str = "msys-http";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    OpenPixel,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedUrl {
    pub kind: UrlKind,
    pub url: String,
}

// Streaming tag scan over the HTML body: open-pixel candidates come from
// img/src, click candidates from a/href. Anything else is ignored.
pub fn scan_urls(html: &str) -> Vec<TrackedUrl> {
    let mut urls = Vec::new();
    scan_tags(html, |tag, attr, value| {
        let kind = match (tag, attr) {
            ("img", "src") => UrlKind::OpenPixel,
            ("a", "href") => UrlKind::Link,
            _ => return,
        };
        if !value.is_empty() {
            urls.push(TrackedUrl {
                kind,
                url: value.to_string(),
            });
        }
    });
    urls
}

fn scan_tags(html: &str, mut on_attr: impl FnMut(&str, &str, &str)) {
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];
        let Some(end) = rest.find('>') else {
            break;
        };
        let tag = &rest[..end];
        rest = &rest[end + 1..];
        if tag.starts_with('/') || tag.starts_with('!') || tag.starts_with('?') {
            continue;
        }

        let name_end = tag
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(tag.len());
        let name = tag[..name_end].to_ascii_lowercase();
        let mut attrs = tag[name_end..].trim_start();

        while !attrs.is_empty() {
            let attr_end = attrs
                .find(|c: char| c == '=' || c.is_ascii_whitespace())
                .unwrap_or(attrs.len());
            let attr = attrs[..attr_end].to_ascii_lowercase();
            attrs = attrs[attr_end..].trim_start();

            let mut value = "";
            if let Some(after_eq) = attrs.strip_prefix('=') {
                let after_eq = after_eq.trim_start();
                if let Some(quoted) = after_eq.strip_prefix('"') {
                    let value_end = quoted.find('"').unwrap_or(quoted.len());
                    value = &quoted[..value_end];
                    attrs = quoted.get(value_end + 1..).unwrap_or("");
                } else if let Some(quoted) = after_eq.strip_prefix('\'') {
                    let value_end = quoted.find('\'').unwrap_or(quoted.len());
                    value = &quoted[..value_end];
                    attrs = quoted.get(value_end + 1..).unwrap_or("");
                } else {
                    let value_end = after_eq
                        .find(|c: char| c.is_ascii_whitespace())
                        .unwrap_or(after_eq.len());
                    value = &after_eq[..value_end];
                    attrs = &after_eq[value_end..];
                }
            }
            if !attr.is_empty() && attr != "/" {
                on_attr(&name, &attr, value);
            }
            attrs = attrs.trim_start();
        }
    }
}

// Per-origin verification verdicts with independent expiry. Staleness is
// acceptable, this only exists to avoid re-probing the same host within a
// batch.
pub struct EndpointCache {
    verified: lru_cache::LruCache<String, Instant, ahash::RandomState>,
    rejected: lru_cache::LruCache<String, Instant, ahash::RandomState>,
    ttl_verified: Duration,
    ttl_rejected: Duration,
}

impl EndpointCache {
    pub fn new(capacity: usize, ttl_verified: Duration, ttl_rejected: Duration) -> Self {
        EndpointCache {
            verified: lru_cache::LruCache::with_hasher(capacity, ahash::RandomState::new()),
            rejected: lru_cache::LruCache::with_hasher(capacity, ahash::RandomState::new()),
            ttl_verified,
            ttl_rejected,
        }
    }

    pub fn get(&mut self, origin: &str) -> Option<bool> {
        if let Some(valid_until) = self.verified.get_mut(origin) {
            if *valid_until >= Instant::now() {
                return Some(true);
            }
            self.verified.remove(origin);
        }
        if let Some(valid_until) = self.rejected.get_mut(origin) {
            if *valid_until >= Instant::now() {
                return Some(false);
            }
            self.rejected.remove(origin);
        }
        None
    }

    pub fn insert(&mut self, origin: String, verdict: bool) {
        if verdict {
            self.verified
                .insert(origin, Instant::now() + self.ttl_verified);
        } else {
            self.rejected
                .insert(origin, Instant::now() + self.ttl_rejected);
        }
    }
}

pub struct Tracker<'x> {
    pub core: &'x Core,
    pub http: &'x reqwest::Client,
}

impl Tracker<'_> {
    // Open / open-again / click / click-again simulation over one HTML
    // body, as driven by the conditional probabilities. Returns the action
    // fragment for the log line.
    pub async fn simulate<R: Rng>(
        &self,
        body: &str,
        model: &ProbabilityModel,
        rng: &mut R,
    ) -> String {
        let mut log = String::from("Open");
        self.core.store.increment("open").await;
        self.feed(body, UrlKind::OpenPixel, "open_url_not_sparkpost", rng)
            .await;

        if rng.gen::<f64>() <= model.open_again_given_open {
            self.feed(body, UrlKind::OpenPixel, "open_url_not_sparkpost", rng)
                .await;
            log.push_str("_OpenAgain");
            self.core.store.increment("open_again").await;
        }
        if rng.gen::<f64>() <= model.click_given_open {
            self.feed(body, UrlKind::Link, "click_url_not_sparkpost", rng)
                .await;
            log.push_str("_Click");
            self.core.store.increment("click").await;
            if rng.gen::<f64>() <= model.click_again_given_click {
                self.feed(body, UrlKind::Link, "click_url_not_sparkpost", rng)
                    .await;
                log.push_str("_ClickAgain");
                self.core.store.increment("click_again").await;
            }
        }
        log
    }

    async fn feed<R: Rng>(&self, body: &str, kind: UrlKind, reject_counter: &str, rng: &mut R) {
        for tracked in scan_urls(body) {
            if tracked.kind != kind {
                continue;
            }
            if self.endpoint_verified(&tracked.url).await {
                self.touch(&tracked.url, rng).await;
            } else {
                self.core.store.increment(reject_counter).await;
            }
        }
    }

    // A URL is only visited when its origin is allowlisted or probes as a
    // genuine platform tracking endpoint.
    async fn endpoint_verified(&self, url: &str) -> bool {
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        if self
            .core
            .config
            .tracking
            .domains
            .contains(&host.to_ascii_lowercase())
        {
            return true;
        }

        let origin = match url.port() {
            Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
            None => format!("{}://{}/", url.scheme(), host),
        };
        if let Some(verdict) = self.core.endpoints.lock().get(&origin) {
            return verdict;
        }
        let verdict = self.probe(&origin).await;
        self.core.endpoints.lock().insert(origin, verdict);
        verdict
    }

    async fn probe(&self, origin: &str) -> bool {
        match self.http.request(Method::OPTIONS, origin).send().await {
            Ok(response) => {
                response.status() == StatusCode::METHOD_NOT_ALLOWED
                    && response
                        .headers()
                        .get(header::SERVER)
                        .and_then(|value| value.to_str().ok())
                        == Some(TRACKING_SERVER)
            }
            Err(err) => {
                tracing::debug!(
                    context = "tracking",
                    event = "probe-failed",
                    origin = origin,
                    reason = %err,
                );
                false
            }
        }
    }

    // Non-redirecting GET with a randomized user agent; the body is left
    // unread on purpose.
    async fn touch<R: Rng>(&self, url: &str, rng: &mut R) {
        let agents = &self.core.config.tracking.user_agents;
        let agent = agents
            .choose(rng)
            .map(|agent| agent.as_str())
            .unwrap_or(crate::USER_AGENT);
        if let Err(err) = self
            .http
            .get(url)
            .header(header::USER_AGENT, agent)
            .send()
            .await
        {
            tracing::debug!(
                context = "tracking",
                event = "touch-failed",
                url = url,
                reason = %err,
            );
        }
    }
}
