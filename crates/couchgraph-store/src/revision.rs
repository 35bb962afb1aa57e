use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Revision token of the form `<generation>-<hash>`.
///
/// The generation counts writes to a document; the hash is derived from the
/// written content so two writers racing from the same parent produce
/// different tokens.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Revision {
    generation: u64,
    hash: String,
}

impl Revision {
    /// First revision of a document.
    pub fn first(content: &[u8]) -> Self {
        Self::derive(1, "", content)
    }

    /// The revision following this one for `content`.
    pub fn next(&self, content: &[u8]) -> Self {
        Self::derive(self.generation + 1, &self.hash, content)
    }

    fn derive(generation: u64, parent: &str, content: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&generation.to_be_bytes());
        hasher.update(parent.as_bytes());
        hasher.update(content);
        let digest = hasher.finalize();
        Self {
            generation,
            hash: hex::encode(&digest.as_bytes()[..16]),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl FromStr for Revision {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| StoreError::InvalidDocument(format!("malformed revision `{s}`")))?;
        let generation = generation
            .parse()
            .map_err(|_| StoreError::InvalidDocument(format!("malformed revision `{s}`")))?;
        if hash.is_empty() {
            return Err(StoreError::InvalidDocument(format!("malformed revision `{s}`")));
        }
        Ok(Self {
            generation,
            hash: hash.to_string(),
        })
    }
}
