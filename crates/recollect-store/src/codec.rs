//! Fragment codec.
//!
//! The content-bearing part of a fragment is stored as a compact binary
//! payload:
//!
//! ```text
//! ┌────────────┬─────────┬──────────────────────────────────────┐
//! │ magic RCFG │ version │ bincode(FragmentContent)             │
//! │  4 bytes   │ 1 byte  │ standard config, variable length     │
//! └────────────┴─────────┴──────────────────────────────────────┘
//! ```
//!
//! Metadata is never binary-packed: it becomes a [`MetadataRecord`] of JSON
//! text columns so every field stays queryable with `json_extract`.

use std::collections::BTreeSet;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::types::{AccessPattern, Fragment, FragmentContent, FragmentId, TemporalTags};

/// Payload magic bytes.
pub const PAYLOAD_MAGIC: [u8; 4] = *b"RCFG";

/// Codec version written into every payload and the store's marker row.
pub const CODEC_VERSION: u8 = 1;

const HEADER_LEN: usize = PAYLOAD_MAGIC.len() + 1;

/// Errors produced while encoding or decoding fragments.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is shorter than the header.
    #[error("payload truncated: {0} bytes")]
    Truncated(usize),

    /// Payload does not start with the expected magic bytes.
    #[error("payload magic mismatch")]
    BadMagic,

    /// Payload (or store) was written by a different codec version.
    #[error("codec version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u8, found: u8 },

    /// Body bytes could not be decoded.
    #[error("corrupt payload: {0}")]
    Corrupt(String),

    /// Content could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A metadata column is not valid JSON for its field.
    #[error("metadata column '{column}': {source}")]
    Metadata {
        column: &'static str,
        source: serde_json::Error,
    },

    /// Stored `fragment_type` code is not known.
    #[error("unknown fragment type code {0}")]
    UnknownFragmentType(i64),

    /// Stored timestamp is out of range.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

// ─────────────────────────────────────────────────────────────────────────────
// Binary Payload
// ─────────────────────────────────────────────────────────────────────────────

/// Encode the content-bearing part of a fragment.
pub fn encode_content(fragment: &Fragment) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serde::encode_to_vec(&fragment.content, bincode::config::standard())
        .map_err(|e| CodecError::Encode(e.to_string()))?;

    let mut payload = Vec::with_capacity(HEADER_LEN + body.len());
    payload.extend_from_slice(&PAYLOAD_MAGIC);
    payload.push(CODEC_VERSION);
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Decode a payload written by [`encode_content`].
pub fn decode_content(payload: &[u8]) -> Result<FragmentContent, CodecError> {
    if payload.len() < HEADER_LEN {
        return Err(CodecError::Truncated(payload.len()));
    }
    if payload[..PAYLOAD_MAGIC.len()] != PAYLOAD_MAGIC {
        return Err(CodecError::BadMagic);
    }

    let found = payload[PAYLOAD_MAGIC.len()];
    if found != CODEC_VERSION {
        return Err(CodecError::VersionMismatch {
            expected: CODEC_VERSION,
            found,
        });
    }

    let body = &payload[HEADER_LEN..];
    let (content, consumed): (FragmentContent, usize) =
        bincode::serde::decode_from_slice(body, bincode::config::standard())
            .map_err(|e| CodecError::Corrupt(e.to_string()))?;

    if consumed != body.len() {
        return Err(CodecError::Corrupt(format!(
            "{} trailing bytes",
            body.len() - consumed
        )));
    }

    Ok(content)
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata Record
// ─────────────────────────────────────────────────────────────────────────────

/// Normalized metadata row for the `fragment_metadata` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    /// Category label, mirrored from the payload for filtered scans.
    pub category: String,
    /// JSON object.
    pub temporal_tags: String,
    /// JSON array of strings (sorted).
    pub symbolic_tags: String,
    /// JSON array of fragment ids.
    pub associative_links: String,
    /// JSON object.
    pub access_pattern: String,
    /// Plain text.
    pub narrative_role: String,
}

impl MetadataRecord {
    /// Build the record for a fragment.
    pub fn from_fragment(fragment: &Fragment) -> Result<Self, CodecError> {
        Ok(Self {
            category: fragment.content.category.clone(),
            temporal_tags: to_json("temporal_tags", &fragment.temporal_tags)?,
            symbolic_tags: encode_tags(&fragment.symbolic_tags)?,
            associative_links: encode_links(&fragment.associative_links)?,
            access_pattern: to_json("access_pattern", &fragment.access_pattern)?,
            narrative_role: fragment.narrative_role.clone(),
        })
    }

    /// Decode the temporal tags column.
    pub fn temporal_tags(&self) -> Result<TemporalTags, CodecError> {
        from_json("temporal_tags", &self.temporal_tags)
    }

    /// Decode the symbolic tags column.
    pub fn symbolic_tags(&self) -> Result<BTreeSet<String>, CodecError> {
        decode_tags(&self.symbolic_tags)
    }

    /// Decode the associative links column.
    pub fn associative_links(&self) -> Result<Vec<FragmentId>, CodecError> {
        decode_links(&self.associative_links)
    }

    /// Decode the access pattern column.
    pub fn access_pattern(&self) -> Result<AccessPattern, CodecError> {
        from_json("access_pattern", &self.access_pattern)
    }
}

/// Encode a tag set as a JSON array.
pub fn encode_tags(tags: &BTreeSet<String>) -> Result<String, CodecError> {
    to_json("symbolic_tags", tags)
}

/// Encode a link list as a JSON array.
pub fn encode_links(links: &[FragmentId]) -> Result<String, CodecError> {
    to_json("associative_links", links)
}

/// Decode a `symbolic_tags` column.
pub fn decode_tags(text: &str) -> Result<BTreeSet<String>, CodecError> {
    from_json("symbolic_tags", text)
}

/// Decode an `associative_links` column.
pub fn decode_links(text: &str) -> Result<Vec<FragmentId>, CodecError> {
    from_json("associative_links", text)
}

fn to_json<T: Serialize + ?Sized>(column: &'static str, value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|source| CodecError::Metadata { column, source })
}

fn from_json<T: DeserializeOwned>(column: &'static str, text: &str) -> Result<T, CodecError> {
    serde_json::from_str(text).map_err(|source| CodecError::Metadata { column, source })
}
