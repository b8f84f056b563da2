//! Validation for fragments entering the write path.
//!
//! Invalid fragments are rejected synchronously at enqueue time and never
//! reach the buffer. Checks:
//! - Fragment id is non-empty
//! - Content is non-empty and free of NUL bytes
//! - Confidence score is finite and in `[0.0, 1.0]`
//! - Link list contains no self-reference and respects the cap
//! - Timestamps carry at most microsecond precision, the precision the store
//!   keeps

use chrono::{DateTime, Timelike, Utc};

use crate::types::Fragment;

/// Maximum associative links a fragment may carry.
pub const MAX_ASSOCIATIVE_LINKS: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Validation Error
// ─────────────────────────────────────────────────────────────────────────────

/// Specific validation error types for fragment data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Fragment id is empty.
    #[error("fragment id is empty")]
    EmptyId,

    /// Fragment content is empty.
    #[error("fragment content is empty")]
    EmptyContent,

    /// Fragment content contains NUL bytes.
    #[error("fragment content contains NUL bytes")]
    InvalidContent,

    /// Confidence score is out of valid range (0.0-1.0).
    #[error("confidence score {0} is out of range [0.0, 1.0]")]
    InvalidConfidence(f64),

    /// Fragment links to itself.
    #[error("fragment {0} links to itself")]
    SelfLink(String),

    /// Too many associative links.
    #[error("fragment has {count} associative links, maximum is {max}")]
    TooManyLinks {
        /// Number of links present.
        count: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A timestamp is finer than the store can represent.
    #[error("{field} has sub-microsecond precision")]
    SubMicrosecondTimestamp {
        /// Offending field.
        field: &'static str,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Field Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate fragment content.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if content.contains('\0') {
        return Err(ValidationError::InvalidContent);
    }
    Ok(())
}

/// Validate a confidence score is in the valid range [0.0, 1.0].
pub fn validate_confidence_score(score: f64) -> Result<(), ValidationError> {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(ValidationError::InvalidConfidence(score));
    }
    Ok(())
}

/// Validate that a timestamp survives storage unchanged.
pub fn validate_timestamp(field: &'static str, at: DateTime<Utc>) -> Result<(), ValidationError> {
    if at.nanosecond() % 1_000 != 0 {
        return Err(ValidationError::SubMicrosecondTimestamp { field });
    }
    Ok(())
}

/// Validate a complete fragment.
pub fn validate_fragment(fragment: &Fragment) -> Result<(), ValidationError> {
    if fragment.id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    validate_content(&fragment.content.body)?;
    validate_confidence_score(fragment.confidence_score)?;

    if fragment.associative_links.len() > MAX_ASSOCIATIVE_LINKS {
        return Err(ValidationError::TooManyLinks {
            count: fragment.associative_links.len(),
            max: MAX_ASSOCIATIVE_LINKS,
        });
    }
    if fragment.associative_links.contains(&fragment.id) {
        return Err(ValidationError::SelfLink(fragment.id.to_string()));
    }

    validate_timestamp("created_at", fragment.created_at)?;
    validate_timestamp("last_evolved", fragment.last_evolved)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FragmentId;
    use chrono::TimeZone;

    #[test]
    fn test_validate_content() {
        assert!(validate_content("Hello, world!").is_ok());
        assert!(validate_content("日本語テスト").is_ok());
        assert_eq!(validate_content(""), Err(ValidationError::EmptyContent));
        assert_eq!(
            validate_content("Hello\0World"),
            Err(ValidationError::InvalidContent)
        );
    }

    #[test]
    fn test_validate_confidence_score() {
        assert!(validate_confidence_score(0.0).is_ok());
        assert!(validate_confidence_score(0.5).is_ok());
        assert!(validate_confidence_score(1.0).is_ok());

        for bad in [-0.1, 1.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                validate_confidence_score(bad),
                Err(ValidationError::InvalidConfidence(_))
            ));
        }
    }

    #[test]
    fn test_validate_fragment_valid() {
        let fragment = Fragment::new("Test content", "notes");
        assert!(validate_fragment(&fragment).is_ok());
    }

    #[test]
    fn test_validate_fragment_empty_id() {
        let mut fragment = Fragment::new("x", "notes");
        fragment.id = FragmentId::from_string("  ");
        assert_eq!(validate_fragment(&fragment), Err(ValidationError::EmptyId));
    }

    #[test]
    fn test_validate_fragment_confidence() {
        let fragment = Fragment::new("x", "notes").with_confidence(1.5);
        assert_eq!(
            validate_fragment(&fragment),
            Err(ValidationError::InvalidConfidence(1.5))
        );
    }

    #[test]
    fn test_validate_fragment_links() {
        let mut fragment = Fragment::new("x", "notes");
        fragment.associative_links.push(fragment.id.clone());
        assert!(matches!(
            validate_fragment(&fragment),
            Err(ValidationError::SelfLink(_))
        ));

        let mut fragment = Fragment::new("x", "notes");
        fragment.associative_links = (0..=MAX_ASSOCIATIVE_LINKS)
            .map(|i| FragmentId::from_string(format!("frag-{}", i)))
            .collect();
        assert!(matches!(
            validate_fragment(&fragment),
            Err(ValidationError::TooManyLinks { .. })
        ));
    }

    #[test]
    fn test_validate_fragment_timestamp_precision() {
        let mut fragment = Fragment::new("x", "notes");
        fragment.created_at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(
            validate_fragment(&fragment),
            Err(ValidationError::SubMicrosecondTimestamp {
                field: "created_at"
            })
        );

        fragment.created_at = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        fragment.last_evolved = Utc.timestamp_opt(1_700_000_001, 1).unwrap();
        assert_eq!(
            validate_fragment(&fragment),
            Err(ValidationError::SubMicrosecondTimestamp {
                field: "last_evolved"
            })
        );

        fragment.last_evolved = fragment.created_at;
        assert!(validate_fragment(&fragment).is_ok());
    }
}
