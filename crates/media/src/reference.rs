//! Attachment reference codec.
//!
//! Every attachment reference string persisted by the entity layer is
//! parsed exactly once into a tagged [`AttachmentRef`]; downstream code
//! matches on the tag and never re-inspects the raw string. External
//! URLs are never owned, listed, or deleted by the storage tiers.

use std::fmt;

use thiserror::Error;

/// Reference parse failure. Consumers treat every variant as not-found
/// and never follow the offending string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefParseError {
    /// Reference is empty after normalization.
    #[error("empty reference")]
    Empty,
    /// Reference contains a parent-directory segment.
    #[error("reference contains a parent-directory segment")]
    Traversal,
}

/// Path-safe relative token identifying a stored object in either tier.
///
/// Guaranteed free of backslashes, leading slashes, empty segments and
/// `..` segments by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Normalize and validate a raw token into a path-safe key.
    ///
    /// Backslashes become forward slashes, leading slashes are stripped
    /// and `.` segments are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RefParseError::Traversal`] for `..` segments and
    /// [`RefParseError::Empty`] when nothing remains after normalization.
    pub fn parse(raw: &str) -> Result<Self, RefParseError> {
        let normalized = raw.replace('\\', "/");
        let mut segments = Vec::new();
        for segment in normalized.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(RefParseError::Traversal),
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Err(RefParseError::Empty);
        }
        Ok(Self(segments.join("/")))
    }

    /// The normalized token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key with `prefix/` prepended (no-op for an empty prefix).
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> Self {
        if prefix.is_empty() {
            self.clone()
        } else {
            Self(format!("{}/{}", prefix.trim_matches('/'), self.0))
        }
    }

    /// Key with `prefix/` removed, when present.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &str) -> Option<Self> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return None;
        }
        self.0
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .map(|rest| Self(rest.to_string()))
    }

    /// Whether the key lies under `prefix/`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_matches('/');
        !prefix.is_empty() && self.0.starts_with(prefix) && self.0[prefix.len()..].starts_with('/')
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tagged attachment reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttachmentRef {
    /// Media hosted elsewhere; never owned or deleted by this subsystem.
    External(String),
    /// Object stored in the local and/or remote tier. Which tier holds
    /// the bytes is a resolver/coordinator decision, not encoded here.
    Stored(ObjectKey),
}

impl AttachmentRef {
    /// Parse a raw reference string.
    ///
    /// Strings beginning with `http://`, `https://` or `//` are external;
    /// everything else is normalized into a path-safe [`ObjectKey`].
    ///
    /// # Errors
    ///
    /// Returns a parse error for unsafe or empty stored tokens; callers
    /// map this to not-found.
    pub fn parse(raw: &str) -> Result<Self, RefParseError> {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://")
            || trimmed.starts_with("https://")
            || trimmed.starts_with("//")
        {
            return Ok(Self::External(trimmed.to_string()));
        }
        ObjectKey::parse(trimmed).map(Self::Stored)
    }

    /// The URL an external reference is served as: scheme-relative URLs
    /// are upgraded to https.
    #[must_use]
    pub fn external_url(&self) -> Option<String> {
        match self {
            Self::External(url) if url.starts_with("//") => Some(format!("https:{url}")),
            Self::External(url) => Some(url.clone()),
            Self::Stored(_) => None,
        }
    }

    /// The persisted string form of this reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::External(url) => url,
            Self::Stored(key) => key.as_str(),
        }
    }
}

impl fmt::Display for AttachmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_and_scheme_relative_are_external() {
        assert!(matches!(
            AttachmentRef::parse("https://cdn.example.com/x.png"),
            Ok(AttachmentRef::External(_))
        ));
        assert!(matches!(
            AttachmentRef::parse("http://cdn.example.com/x.png"),
            Ok(AttachmentRef::External(_))
        ));
        assert!(matches!(
            AttachmentRef::parse("//cdn.example.com/x.png"),
            Ok(AttachmentRef::External(_))
        ));
    }

    #[test]
    fn scheme_relative_upgrades_to_https() {
        let r = AttachmentRef::parse("//cdn.example.com/x.png").unwrap();
        assert_eq!(
            r.external_url().unwrap(),
            "https://cdn.example.com/x.png"
        );
    }

    #[test]
    fn plain_tokens_are_stored() {
        let r = AttachmentRef::parse("media/20260829_photo.jpg").unwrap();
        assert_eq!(r.as_str(), "media/20260829_photo.jpg");
        assert!(matches!(r, AttachmentRef::Stored(_)));
    }

    #[test]
    fn traversal_is_rejected() {
        assert_eq!(
            AttachmentRef::parse("../../etc/passwd"),
            Err(RefParseError::Traversal)
        );
        assert_eq!(
            AttachmentRef::parse("a/../b.png"),
            Err(RefParseError::Traversal)
        );
        assert_eq!(
            AttachmentRef::parse("..\\..\\windows"),
            Err(RefParseError::Traversal)
        );
    }

    #[test]
    fn leading_slashes_and_backslashes_normalize() {
        let key = ObjectKey::parse("/a\\b//c.png").unwrap();
        assert_eq!(key.as_str(), "a/b/c.png");
    }

    #[test]
    fn empty_and_dot_only_are_rejected() {
        assert_eq!(ObjectKey::parse(""), Err(RefParseError::Empty));
        assert_eq!(ObjectKey::parse("///"), Err(RefParseError::Empty));
        assert_eq!(ObjectKey::parse("./."), Err(RefParseError::Empty));
    }

    #[test]
    fn prefix_round_trips() {
        let key = ObjectKey::parse("photo.jpg").unwrap();
        let prefixed = key.with_prefix("media");
        assert_eq!(prefixed.as_str(), "media/photo.jpg");
        assert!(prefixed.has_prefix("media"));
        assert_eq!(prefixed.strip_prefix("media").unwrap(), key);
        assert!(key.strip_prefix("media").is_none());
    }

    #[test]
    fn empty_prefix_is_a_no_op() {
        let key = ObjectKey::parse("photo.jpg").unwrap();
        assert_eq!(key.with_prefix(""), key);
        assert!(!key.has_prefix(""));
    }
}
