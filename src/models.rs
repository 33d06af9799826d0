use crate::config::{HASH_BYTES, SHARD_PREFIX_LEN};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Page,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub kind: LinkKind,
    pub title: String,
}

impl Link {
    pub fn page(title: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Page,
            title: title.into(),
        }
    }

    pub fn category(title: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Category,
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageType {
    Article,
    Redirect(String),
}

/// One `<page>` element of the dump, emitted once the element closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRecord {
    pub title: String,
    pub text: String,
}

/// Hex digest of a title; the only key shared between pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TitleHash(String);

impl TitleHash {
    pub const HEX_LEN: usize = HASH_BYTES * 2;

    /// Truncated SHA-256 of the UTF-8 bytes of `title`. Stable across runs and platforms.
    pub fn of(title: &str) -> Self {
        let digest = Sha256::digest(title.as_bytes());
        Self(hex::encode(&digest[..HASH_BYTES]))
    }

    /// Rebuilds a hash from a stored shard key suffix and field, e.g. during enumeration.
    pub fn from_parts(prefix: &str, rest: &str) -> Option<Self> {
        let joined = format!("{prefix}{rest}");
        Self::parse(&joined)
    }

    pub fn parse(hex: &str) -> Option<Self> {
        let valid = hex.len() == Self::HEX_LEN
            && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the hash into `(shard prefix, field remainder)`.
    pub fn split(&self) -> (&str, &str) {
        self.0.split_at(SHARD_PREFIX_LEN)
    }
}

impl fmt::Display for TitleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic one-way digest used as the cross-stage join key.
pub fn title_to_hash_id(title: &str) -> TitleHash {
    TitleHash::of(title)
}
