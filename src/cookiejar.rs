//! Session cookie jar (`spec.md` §4.8).
//!
//! Maintained outside the protocol engine; `HttpSession` calls `extract`
//! after every response and `gather` before every request. Malformed
//! `set-cookie` lines are skipped rather than surfaced as errors — a
//! session should keep working even if one server sends a broken cookie.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use http::{HeaderMap, HeaderValue};

/// One jar entry, keyed by `(name, domain, path)`.
#[derive(Debug, Clone)]
pub(crate) struct Cookie {
    pub(crate) name: String,
    pub(crate) value: String,
    pub(crate) domain: Option<String>,
    pub(crate) host_only: bool,
    pub(crate) path: Option<String>,
    pub(crate) expires: Option<SystemTime>,
    pub(crate) secure: bool,
    pub(crate) http_only: bool,
    pub(crate) creation_time: SystemTime,
    pub(crate) last_access_time: SystemTime,
    pub(crate) persistent: bool,
}

impl Cookie {
    fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires, Some(t) if t <= now)
    }
}

type Key = (String, String, String);

/// A per-session set of cookies, scoped by `(name, domain, path)`.
#[derive(Default)]
pub(crate) struct CookieJar {
    entries: HashMap<Key, Cookie>,
}

impl CookieJar {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parse every `set-cookie` header in `headers`, observed while talking
    /// to `request_domain`, inserting or replacing entries keyed by
    /// `(name, domain, path)`.
    pub(crate) fn extract(&mut self, request_domain: &str, headers: &HeaderMap) {
        let now = SystemTime::now();
        self.prune_expired(now);

        for raw in headers.get_all(http::header::SET_COOKIE) {
            let Ok(text) = raw.to_str() else { continue };
            let Some(cookie) = parse_set_cookie(text, request_domain, now) else {
                tracing::debug!(header = text, "skipping malformed set-cookie");
                continue;
            };
            if cookie.is_expired(now) {
                self.entries.remove(&cookie_key(&cookie));
                continue;
            }
            tracing::trace!(name = %cookie.name, domain = request_domain, "cookie extracted");
            self.entries.insert(cookie_key(&cookie), cookie);
        }
    }

    /// Build the `cookie` header value applicable to a request against
    /// `(scheme, domain, path)`, or `None` if no cookie applies.
    pub(crate) fn gather(&mut self, scheme: &str, domain: &str, path: &str) -> Option<HeaderValue> {
        let now = SystemTime::now();
        self.prune_expired(now);

        let mut applicable: Vec<&mut Cookie> = self
            .entries
            .values_mut()
            .filter(|c| {
                if c.secure && scheme != "https" {
                    return false;
                }
                // Host-only cookies (no explicit `Domain` attribute) carry no
                // domain restriction at all (original_source stores an empty
                // domain for these and only filters `if domain`); the suffix
                // check below applies solely to cookies that named a `Domain`.
                if !c.host_only {
                    if let Some(cookie_domain) = &c.domain {
                        if !domain_matches(domain, cookie_domain) {
                            return false;
                        }
                    }
                }
                if let Some(cookie_path) = &c.path {
                    if !path.starts_with(cookie_path.as_str()) {
                        return false;
                    }
                }
                true
            })
            .collect();

        // Among same-name cookies, prefer longer domain, then longer path,
        // then earlier creation time (RFC 6265 §5.4 step 2).
        applicable.sort_by(|a, b| {
            a.name.cmp(&b.name).then_with(|| {
                let domain_len = |c: &Cookie| c.domain.as_ref().map_or(0, String::len);
                let path_len = |c: &Cookie| c.path.as_ref().map_or(0, String::len);
                domain_len(b)
                    .cmp(&domain_len(a))
                    .then_with(|| path_len(b).cmp(&path_len(a)))
                    .then_with(|| a.creation_time.cmp(&b.creation_time))
            })
        });

        let mut seen_names = std::collections::HashSet::new();
        let mut pairs = Vec::new();
        for cookie in applicable {
            if !seen_names.insert(cookie.name.clone()) {
                continue;
            }
            cookie.last_access_time = now;
            pairs.push(format!("{}={}", cookie.name, cookie.value));
        }

        if pairs.is_empty() {
            return None;
        }
        tracing::trace!(count = pairs.len(), domain, "cookies gathered for request");
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }

    fn prune_expired(&mut self, now: SystemTime) {
        self.entries.retain(|_, c| !c.is_expired(now));
    }
}

fn cookie_key(c: &Cookie) -> Key {
    (
        c.name.clone(),
        c.domain.clone().unwrap_or_default(),
        c.path.clone().unwrap_or_default(),
    )
}

/// `request_domain` matches `cookie_domain` if equal, or a subdomain of it.
/// Only consulted for cookies that carried an explicit `Domain` attribute;
/// host-only cookies skip this check entirely in `gather`.
fn domain_matches(request_domain: &str, cookie_domain: &str) -> bool {
    let cookie_domain = cookie_domain.trim_start_matches('.');
    request_domain == cookie_domain || request_domain.ends_with(&format!(".{cookie_domain}"))
}

fn parse_set_cookie(text: &str, request_domain: &str, now: SystemTime) -> Option<Cookie> {
    let mut parts = text.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut domain = None;
    let mut path = None;
    let mut expires = None;
    let mut max_age = None;
    let mut secure = false;
    let mut http_only = false;

    for attr in parts {
        let attr = attr.trim();
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => domain = Some(val.trim().to_owned()),
            "path" if !val.is_empty() => path = Some(val.trim().to_owned()),
            "expires" => expires = httpdate::parse_http_date(val.trim()).ok(),
            "max-age" => max_age = val.trim().parse::<i64>().ok(),
            "secure" => secure = true,
            "httponly" => http_only = true,
            _ => {}
        }
    }

    // Max-Age takes priority over Expires when both are present (RFC 6265
    // §5.3 step 3); original_source confirms this over the distilled spec's
    // "max-age implies expires" wording.
    if let Some(max_age) = max_age {
        let delta = if max_age <= 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(max_age as u64)
        };
        expires = Some(now + delta);
    }

    let host_only = domain.is_none();

    Some(Cookie {
        name: name.to_owned(),
        value: value.trim().to_owned(),
        domain: domain.or_else(|| Some(request_domain.to_owned())),
        host_only,
        path,
        persistent: expires.is_some(),
        expires,
        secure,
        http_only,
        creation_time: now,
        last_access_time: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_and_gather_round_trip() {
        let mut jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::SET_COOKIE, HeaderValue::from_static("session=abc123; Path=/; HttpOnly"));
        jar.extract("example.test", &headers);

        let cookie_header = jar.gather("https", "example.test", "/account").unwrap();
        assert_eq!(cookie_header.to_str().unwrap(), "session=abc123");
    }

    #[test]
    fn secure_cookie_not_sent_over_plain_http() {
        let mut jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::SET_COOKIE, HeaderValue::from_static("id=1; Secure"));
        jar.extract("example.test", &headers);

        assert!(jar.gather("http", "example.test", "/").is_none());
        assert!(jar.gather("https", "example.test", "/").is_some());
    }

    #[test]
    fn max_age_zero_expires_immediately() {
        let mut jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::SET_COOKIE, HeaderValue::from_static("id=1; Max-Age=0"));
        jar.extract("example.test", &headers);
        assert!(jar.gather("https", "example.test", "/").is_none());
    }

    #[test]
    fn domain_scoping_excludes_unrelated_hosts() {
        let mut jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::SET_COOKIE,
            HeaderValue::from_static("id=1; Domain=example.test"),
        );
        jar.extract("example.test", &headers);
        assert!(jar.gather("https", "other.test", "/").is_none());
        assert!(jar.gather("https", "api.example.test", "/").is_some());
    }

    #[test]
    fn host_only_cookie_has_no_domain_restriction_in_gather() {
        let mut jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::SET_COOKIE, HeaderValue::from_static("id=1"));
        jar.extract("example.test", &headers);
        assert!(jar.gather("https", "example.test", "/").is_some());
        assert!(jar.gather("https", "api.example.test", "/").is_some());
    }
}
