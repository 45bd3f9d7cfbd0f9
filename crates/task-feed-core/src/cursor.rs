//! Stream positions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire value of the "beginning of stream" sentinel.
pub const BEGINNING: &str = "0";

/// Store-assigned identifier of one entry.
///
/// Opaque to the feed: it is stored, compared for equality and forwarded,
/// never parsed. Ordering is the store's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Wrap a store-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Last-seen position within one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cursor {
    /// Nothing seen yet; reads start at the first entry.
    #[default]
    Beginning,
    /// Reads start strictly after this id.
    After(StreamId),
}

impl Cursor {
    /// Parse a client-supplied resume token.
    ///
    /// Empty strings and the `"0"` sentinel both mean "beginning".
    #[must_use]
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() || token == BEGINNING {
            Self::Beginning
        } else {
            Self::After(StreamId::new(token))
        }
    }

    #[must_use]
    pub const fn is_beginning(&self) -> bool {
        matches!(self, Self::Beginning)
    }

    /// Token to hand to the store's tail read.
    #[must_use]
    pub fn as_token(&self) -> &str {
        match self {
            Self::Beginning => BEGINNING,
            Self::After(id) => id.as_str(),
        }
    }

    /// Move the cursor to `id`.
    pub fn advance(&mut self, id: &StreamId) {
        *self = Self::After(id.clone());
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}
