//! Core fragment types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::CodecError;

/// Number of hex characters of the content hash kept in a fragment id.
const ID_HASH_CHARS: usize = 12;

// ─────────────────────────────────────────────────────────────────────────────
// Fragment ID
// ─────────────────────────────────────────────────────────────────────────────

/// Globally unique fragment identifier.
///
/// Format: `frag-<created_at epoch micros>-<12 hex chars of a content hash>`.
/// The hash input includes a random nonce so identical content submitted in
/// the same microsecond still gets distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    /// Derive a fresh id for content created at `created_at`.
    pub fn generate(content: &FragmentContent, created_at: DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.body.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.category.as_bytes());
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        let digest = hex::encode(hasher.finalize());

        Self(format!(
            "frag-{}-{}",
            created_at.timestamp_micros(),
            &digest[..ID_HASH_CHARS]
        ))
    }

    /// Wrap an existing id string (e.g., one read back from storage).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (never true for generated ids).
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FragmentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FragmentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fragment Type
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of memory a fragment represents. Persisted as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    /// Something that happened.
    #[default]
    Episodic,
    /// A fact or piece of knowledge.
    Semantic,
    /// A learned pattern or how-to.
    Procedural,
    /// A conclusion drawn from other fragments.
    Reflective,
}

impl FragmentType {
    /// Integer code stored in the `fragment_type` column.
    pub fn code(&self) -> i64 {
        match self {
            Self::Episodic => 0,
            Self::Semantic => 1,
            Self::Procedural => 2,
            Self::Reflective => 3,
        }
    }

    /// Decode a stored integer code.
    pub fn from_code(code: i64) -> Result<Self, CodecError> {
        match code {
            0 => Ok(Self::Episodic),
            1 => Ok(Self::Semantic),
            2 => Ok(Self::Procedural),
            3 => Ok(Self::Reflective),
            other => Err(CodecError::UnknownFragmentType(other)),
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Reflective => "reflective",
        }
    }
}

impl fmt::Display for FragmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FragmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "reflective" => Ok(Self::Reflective),
            other => Err(format!("unknown fragment type: {}", other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content and Metadata Parts
// ─────────────────────────────────────────────────────────────────────────────

/// The content-bearing part of a fragment, persisted as a binary payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentContent {
    /// Free-form content.
    pub body: String,
    /// Category label.
    pub category: String,
}

impl FragmentContent {
    /// Create content with a category.
    pub fn new(body: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            category: category.into(),
        }
    }
}

/// Time facets derived once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalTags {
    /// Hour of day (0-23, UTC).
    pub hour: u32,
    /// Full weekday name, e.g. `Monday`.
    pub day_of_week: String,
    /// RFC 3339 timestamp with microsecond precision.
    pub iso_timestamp: String,
}

impl TemporalTags {
    /// Derive the facets of a creation time.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            hour: at.hour(),
            day_of_week: at.format("%A").to_string(),
            iso_timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// Creation time and read counter. The counter is owned by the read path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPattern {
    /// When the fragment was created.
    pub created: DateTime<Utc>,
    /// Number of recorded reads.
    pub access_count: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Fragment
// ─────────────────────────────────────────────────────────────────────────────

/// One atomic memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Unique, immutable identifier.
    pub id: FragmentId,
    /// Content and category.
    pub content: FragmentContent,
    /// Kind of memory.
    pub fragment_type: FragmentType,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence_score: f64,
    /// Time facets derived at creation.
    pub temporal_tags: TemporalTags,
    /// Free-form labels; extended by enrichment after commit.
    pub symbolic_tags: BTreeSet<String>,
    /// Ids of related fragments; appended by enrichment after commit.
    pub associative_links: Vec<FragmentId>,
    /// Creation time and read counter.
    pub access_pattern: AccessPattern,
    /// Role in the surrounding narrative.
    pub narrative_role: String,
    /// Creation time (microsecond precision).
    pub created_at: DateTime<Utc>,
    /// Last enrichment mutation.
    pub last_evolved: DateTime<Utc>,
}

impl Fragment {
    /// Create a new fragment with default type, confidence and role.
    pub fn new(body: impl Into<String>, category: impl Into<String>) -> Self {
        let created_at = Utc::now().trunc_subsecs(6);
        let content = FragmentContent::new(body, category);

        Self {
            id: FragmentId::generate(&content, created_at),
            content,
            fragment_type: FragmentType::default(),
            confidence_score: 1.0,
            temporal_tags: TemporalTags::from_datetime(created_at),
            symbolic_tags: BTreeSet::new(),
            associative_links: Vec::new(),
            access_pattern: AccessPattern {
                created: created_at,
                access_count: 0,
            },
            narrative_role: "observation".to_string(),
            created_at,
            last_evolved: created_at,
        }
    }

    /// Set the fragment type.
    pub fn with_type(mut self, fragment_type: FragmentType) -> Self {
        self.fragment_type = fragment_type;
        self
    }

    /// Set the confidence score. Range is checked at enqueue time.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = confidence;
        self
    }

    /// Add an initial symbolic tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.symbolic_tags.insert(tag.into());
        self
    }

    /// Set the narrative role.
    pub fn with_narrative_role(mut self, role: impl Into<String>) -> Self {
        self.narrative_role = role.into();
        self
    }

    /// Category label.
    pub fn category(&self) -> &str {
        &self.content.category
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fragment Input
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-supplied fields for a new fragment; everything else is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentInput {
    /// Free-form content.
    pub content: String,
    /// Category label.
    pub category: String,
    /// Initial symbolic tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Kind of memory.
    #[serde(default)]
    pub fragment_type: FragmentType,
    /// Role in the surrounding narrative.
    pub narrative_role: String,
}

impl FragmentInput {
    /// Input with default confidence (1.0), type and role.
    pub fn new(content: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            category: category.into(),
            tags: Vec::new(),
            confidence: 1.0,
            fragment_type: FragmentType::default(),
            narrative_role: "observation".to_string(),
        }
    }

    /// Add an initial tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the confidence score.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the fragment type.
    pub fn with_type(mut self, fragment_type: FragmentType) -> Self {
        self.fragment_type = fragment_type;
        self
    }

    /// Set the narrative role.
    pub fn with_narrative_role(mut self, role: impl Into<String>) -> Self {
        self.narrative_role = role.into();
        self
    }

    /// Build the fragment, assigning its id and creation-time facets.
    pub fn into_fragment(self) -> Fragment {
        let mut fragment = Fragment::new(self.content, self.category)
            .with_type(self.fragment_type)
            .with_confidence(self.confidence)
            .with_narrative_role(self.narrative_role);
        fragment.symbolic_tags.extend(self.tags);
        fragment
    }
}
