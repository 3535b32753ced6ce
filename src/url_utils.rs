//! URL utilities: canonical forms for dedup and queue keys for politeness.

use crate::config::{CanonicalizationConfig, QueueKeyPolicy};
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

/// Query parameters that only carry session state.
const SESSION_PARAMS: &[&str] = &["jsessionid", "phpsessid", "sid", "aspsessionid", "cfid", "cftoken"];

pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}

/// Fallback for hosts the public suffix list does not know (localhost, bare IPs).
pub fn get_root_domain(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.split('.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
    } else {
        hostname.to_string()
    }
}

/// Extract registrable domain (eTLD+1) using Public Suffix List.
/// Handles multi-label TLDs: www.example.co.uk -> example.co.uk
pub fn get_registrable_domain(hostname: &str) -> String {
    match psl::domain(hostname.as_bytes()) {
        Some(domain) => String::from_utf8_lossy(domain.as_bytes()).to_string(),
        None => get_root_domain(hostname),
    }
}

/// Canonical form used for fingerprinting. The stored URI is never rewritten.
///
/// Returns `None` when the string is not an absolute URI.
pub fn canonicalize(raw: &str, rules: &CanonicalizationConfig) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;

    // dns:, mailto: and friends have no authority to normalize.
    if url.cannot_be_a_base() {
        return Some(url.as_str().to_ascii_lowercase());
    }

    url.set_fragment(None);

    if rules.strip_www
        && let Some(host) = url.host_str()
        && let Some(stripped) = strip_www_prefix(host)
    {
        let stripped = stripped.to_string();
        url.set_host(Some(&stripped)).ok()?;
    }

    if rules.strip_session_ids {
        strip_session_params(&mut url);
    }

    if url.query() == Some("") {
        url.set_query(None);
    }

    Some(url.to_string())
}

fn strip_www_prefix(host: &str) -> Option<&str> {
    let rest = host.strip_prefix("www")?;
    let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    let rest = rest[digits..].strip_prefix('.')?;
    // Keep "www.com": stripping would leave a bare TLD.
    if rest.contains('.') { Some(rest) } else { None }
}

fn strip_session_params(url: &mut Url) {
    // Path parameters such as ";jsessionid=ABC" before the query.
    let path = url.path().to_string();
    if let Some(pos) = path.to_ascii_lowercase().find(";jsessionid=") {
        url.set_path(&path[..pos]);
    }

    if url.query().is_none() {
        return;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !SESSION_PARAMS.contains(&name.to_ascii_lowercase().as_str()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

/// Key of the queue a URI belongs to. `None` when the URI has no usable host.
pub fn queue_key(raw: &str, policy: QueueKeyPolicy) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;

    // dns:example.com resolves a host, so it queues with that host's fetches.
    if url.scheme() == "dns" {
        let host = url.path().trim_start_matches('/').to_ascii_lowercase();
        if host.is_empty() {
            return None;
        }
        return Some(match policy {
            QueueKeyPolicy::RegistrableDomain => get_registrable_domain(&host),
            _ => host,
        });
    }

    let host = url.host_str()?.to_ascii_lowercase();
    let key = match policy {
        QueueKeyPolicy::Host => host,
        QueueKeyPolicy::Authority => match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        },
        QueueKeyPolicy::RegistrableDomain => get_registrable_domain(&host),
    };
    Some(key)
}

/// Split a canonical URI into its scheme+authority prefix and the remainder.
pub fn split_authority(canonical: &str) -> (&str, &str) {
    match canonical.find("://") {
        Some(idx) => {
            let after = idx + 3;
            match canonical[after..].find('/') {
                Some(slash) => canonical.split_at(after + slash),
                None => (canonical, ""),
            }
        }
        None => (canonical, ""),
    }
}

/// File-system safe, collision-resistant name for a queue's backing files.
pub fn queue_file_stem(key: &str) -> String {
    let readable: String = key
        .chars()
        .take(64)
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{}-{:016x}", readable, xxh3_64(key.as_bytes()))
}

pub fn robots_url(uri: &str) -> Option<String> {
    let parsed = Url::parse(uri).ok()?;
    let scheme = parsed.scheme();
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{}:{}/robots.txt", scheme, host, port)),
        None => Some(format!("{}://{}/robots.txt", scheme, host)),
    }
}

pub fn dns_url(uri: &str) -> Option<String> {
    let host = extract_host(uri)?;
    Some(format!("dns:{}", host))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> CanonicalizationConfig {
        CanonicalizationConfig::default()
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://example.com/path"), Some("example.com".to_string()));
        assert_eq!(extract_host("invalid"), None);
    }

    #[test]
    fn test_canonicalize_basic() {
        assert_eq!(
            canonicalize("HTTP://WWW.Example.COM:80/a#frag", &rules()).as_deref(),
            Some("http://example.com/a")
        );
        assert_eq!(canonicalize("http://example.com/a?", &rules()).as_deref(), Some("http://example.com/a"));
        assert_eq!(canonicalize("not a url", &rules()), None);
    }

    #[test]
    fn test_canonicalize_keeps_www_when_disabled() {
        let keep = CanonicalizationConfig {
            strip_www: false,
            strip_session_ids: false,
        };
        assert_eq!(
            canonicalize("http://www.example.com/", &keep).as_deref(),
            Some("http://www.example.com/")
        );
        assert_eq!(canonicalize("http://www2.example.com/", &rules()).as_deref(), Some("http://example.com/"));
        assert_eq!(canonicalize("http://www.com/", &rules()).as_deref(), Some("http://www.com/"));
    }

    #[test]
    fn test_canonicalize_strips_sessions() {
        assert_eq!(
            canonicalize("http://example.com/a?x=1&PHPSESSID=abc", &rules()).as_deref(),
            Some("http://example.com/a?x=1")
        );
        assert_eq!(
            canonicalize("http://example.com/a;jsessionid=XYZ?sid=1", &rules()).as_deref(),
            Some("http://example.com/a")
        );
    }

    #[test]
    fn test_canonicalize_dns() {
        assert_eq!(canonicalize("dns:Example.com", &rules()).as_deref(), Some("dns:example.com"));
    }

    #[test]
    fn test_queue_key_policies() {
        assert_eq!(queue_key("http://a.example.com:8080/x", QueueKeyPolicy::Host).as_deref(), Some("a.example.com"));
        assert_eq!(
            queue_key("http://a.example.com:8080/x", QueueKeyPolicy::Authority).as_deref(),
            Some("a.example.com:8080")
        );
        assert_eq!(queue_key("http://a.example.com:80/x", QueueKeyPolicy::Authority).as_deref(), Some("a.example.com"));
        assert_eq!(
            queue_key("http://a.b.example.co.uk/", QueueKeyPolicy::RegistrableDomain).as_deref(),
            Some("example.co.uk")
        );
    }

    #[test]
    fn test_dns_shares_host_key() {
        assert_eq!(queue_key("dns:example.com", QueueKeyPolicy::Authority).as_deref(), Some("example.com"));
        assert_eq!(
            queue_key("dns:example.com", QueueKeyPolicy::Authority),
            queue_key("http://example.com/", QueueKeyPolicy::Authority)
        );
    }

    #[test]
    fn test_split_authority() {
        assert_eq!(split_authority("http://example.com/a?b"), ("http://example.com", "/a?b"));
        assert_eq!(split_authority("http://example.com"), ("http://example.com", ""));
        assert_eq!(split_authority("dns:example.com"), ("dns:example.com", ""));
    }

    #[test]
    fn test_queue_file_stem_is_safe_and_distinct() {
        let a = queue_file_stem("example.com:8080");
        let b = queue_file_stem("example.com_8080");
        assert!(a.starts_with("example.com_8080-"));
        assert_ne!(a, b);
        assert!(!a.contains(':'));
    }

    #[test]
    fn test_prerequisite_urls() {
        assert_eq!(robots_url("https://example.com/a/b").as_deref(), Some("https://example.com/robots.txt"));
        assert_eq!(dns_url("https://example.com/a").as_deref(), Some("dns:example.com"));
    }
}
