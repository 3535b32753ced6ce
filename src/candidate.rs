//! Candidate URIs as they move through the frontier.

use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Scheduling priority. Prerequisites and `High` entries are served ahead of the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub enum Priority {
    High,
    Medium,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// One hop of a discovery path, written as a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    Navlink,
    Prerequisite,
    Redirect,
    Embed,
    Speculative,
    Referral,
    Inferred,
}

impl Hop {
    pub fn code(self) -> char {
        match self {
            Hop::Navlink => 'L',
            Hop::Prerequisite => 'P',
            Hop::Redirect => 'R',
            Hop::Embed => 'E',
            Hop::Speculative => 'X',
            Hop::Referral => 'F',
            Hop::Inferred => 'I',
        }
    }

    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'L' => Some(Hop::Navlink),
            'P' => Some(Hop::Prerequisite),
            'R' => Some(Hop::Redirect),
            'E' => Some(Hop::Embed),
            'X' => Some(Hop::Speculative),
            'F' => Some(Hop::Referral),
            'I' => Some(Hop::Inferred),
            _ => None,
        }
    }
}

/// Outcome recorded by the fetch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub enum FetchStatus {
    Unattempted,
    Succeeded,
    Failed,
    Excluded,
}

impl FetchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FetchStatus::Unattempted)
    }
}

/// A URI waiting in (or handed out by) the frontier.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct CandidateUri {
    uri: String,
    path: String,
    via: Option<String>,
    pub priority: Priority,
    is_seed: bool,
    is_prerequisite: bool,
    pub fetch_status: FetchStatus,
    pub fetch_attempts: u32,
    pub fetch_duration_ms: Option<u64>,
}

impl CandidateUri {
    /// A seed: empty discovery path, no via.
    pub fn seed(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            path: String::new(),
            via: None,
            priority: Priority::Normal,
            is_seed: true,
            is_prerequisite: false,
            fetch_status: FetchStatus::Unattempted,
            fetch_attempts: 0,
            fetch_duration_ms: None,
        }
    }

    /// A URI discovered from `parent` through `hop`.
    pub fn discovered(uri: impl Into<String>, parent: &CandidateUri, hop: Hop) -> Self {
        let mut path = parent.path.clone();
        path.push(hop.code());

        Self {
            uri: uri.into(),
            path,
            via: Some(parent.uri.clone()),
            priority: Priority::Normal,
            is_seed: false,
            is_prerequisite: hop == Hop::Prerequisite,
            fetch_status: FetchStatus::Unattempted,
            fetch_attempts: 0,
            fetch_duration_ms: None,
        }
        .with_prerequisite_priority()
    }

    /// A prerequisite (DNS lookup, robots.txt) that must precede `parent`.
    pub fn prerequisite(uri: impl Into<String>, parent: &CandidateUri) -> Self {
        Self::discovered(uri, parent, Hop::Prerequisite)
    }

    /// Rebuild a URI from its journal fields.
    pub fn from_parts(uri: impl Into<String>, path: impl Into<String>, via: Option<String>) -> Self {
        let path = path.into();
        let is_prerequisite = path.ends_with(Hop::Prerequisite.code());

        Self {
            uri: uri.into(),
            is_seed: path.is_empty(),
            path,
            via,
            priority: Priority::Normal,
            is_prerequisite,
            fetch_status: FetchStatus::Unattempted,
            fetch_attempts: 0,
            fetch_duration_ms: None,
        }
        .with_prerequisite_priority()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    fn with_prerequisite_priority(mut self) -> Self {
        if self.is_prerequisite {
            self.priority = Priority::High;
        }
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn via(&self) -> Option<&str> {
        self.via.as_deref()
    }

    pub fn is_seed(&self) -> bool {
        self.is_seed
    }

    pub fn is_prerequisite(&self) -> bool {
        self.is_prerequisite
    }

    pub fn last_hop(&self) -> Option<Hop> {
        self.path.chars().last().and_then(Hop::from_code)
    }

    /// Number of hops from the seed.
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Same URI, cleared of a previous fetch outcome. Used when putting a URI back in line.
    pub fn reset_outcome(&mut self) {
        self.fetch_status = FetchStatus::Unattempted;
        self.fetch_duration_ms = None;
    }

    /// Rewrite `uri` and `via` in serialized `Url` form. That form is
    /// percent-encoded and never contains whitespace. Unparseable values are kept.
    pub fn normalize_serialization(&mut self) {
        if let Ok(parsed) = Url::parse(&self.uri) {
            self.uri = parsed.into();
        }
        if let Some(via) = &self.via
            && let Ok(parsed) = Url::parse(via)
        {
            self.via = Some(parsed.into());
        }
    }

    pub fn encode(&self) -> Result<AlignedVec, CodecError> {
        rkyv::to_bytes::<_, 512>(self)
            .map_err(|e| CodecError::Serialization(format!("Failed to serialize {}: {}", self.uri, e)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        // Spill records are read into plain buffers; rkyv wants an aligned copy.
        let mut aligned = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<CandidateUri>(&aligned)
            .map_err(|e| CodecError::Deserialization(format!("{}", e)))
    }
}

impl fmt::Display for CandidateUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "-" } else { &self.path };
        write!(f, "{} {} {}", self.uri, path, self.via.as_deref().unwrap_or("-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_has_empty_path() {
        let seed = CandidateUri::seed("http://example.com/");
        assert!(seed.is_seed());
        assert_eq!(seed.path(), "");
        assert_eq!(seed.via(), None);
        assert_eq!(seed.depth(), 0);
    }

    #[test]
    fn test_discovered_extends_path() {
        let seed = CandidateUri::seed("http://example.com/");
        let link = CandidateUri::discovered("http://example.com/a", &seed, Hop::Navlink);
        let img = CandidateUri::discovered("http://example.com/a.png", &link, Hop::Embed);

        assert_eq!(img.path(), "LE");
        assert_eq!(img.via(), Some("http://example.com/a"));
        assert_eq!(img.last_hop(), Some(Hop::Embed));
        assert!(!img.is_prerequisite());
    }

    #[test]
    fn test_prerequisite_is_high_priority() {
        let seed = CandidateUri::seed("http://example.com/");
        let dns = CandidateUri::prerequisite("dns:example.com", &seed);
        assert!(dns.is_prerequisite());
        assert_eq!(dns.priority, Priority::High);
        assert_eq!(dns.path(), "P");
    }

    #[test]
    fn test_from_parts_infers_flags() {
        let prereq = CandidateUri::from_parts("http://example.com/robots.txt", "LP", Some("http://example.com/".into()));
        assert!(prereq.is_prerequisite());
        assert!(!prereq.is_seed());

        let seed = CandidateUri::from_parts("http://example.com/", "", None);
        assert!(seed.is_seed());
    }

    #[test]
    fn test_codec_preserves_outcome_fields() {
        let mut curi = CandidateUri::seed("http://example.com/").with_priority(Priority::Medium);
        curi.fetch_attempts = 2;
        curi.fetch_duration_ms = Some(120);

        let bytes = curi.encode().unwrap();
        let decoded = CandidateUri::decode(&bytes).unwrap();
        assert_eq!(decoded, curi);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CandidateUri::decode(&[0xff; 7]).is_err());
    }

    #[test]
    fn test_display_uses_dashes_for_missing_fields() {
        let seed = CandidateUri::seed("http://example.com/");
        assert_eq!(seed.to_string(), "http://example.com/ - -");
    }

    #[test]
    fn test_normalize_serialization_encodes_whitespace() {
        let parent = CandidateUri::seed("http://example.com/a b");
        let mut curi = CandidateUri::discovered("http://example.com/x y", &parent, Hop::Navlink);
        curi.normalize_serialization();
        assert_eq!(curi.uri(), "http://example.com/x%20y");
        assert_eq!(curi.via(), Some("http://example.com/a%20b"));

        let mut dns = CandidateUri::prerequisite("dns:example.com", &parent);
        dns.normalize_serialization();
        assert_eq!(dns.uri(), "dns:example.com");
    }
}
