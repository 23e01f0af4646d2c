// src/utils/hash.rs

//! Content hashing helpers.

use sha1::{Digest, Sha1};

/// Hex SHA-1 of the concatenation of `parts`.
pub fn sha1_hex<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// Hash of a media URL, used as its resolver key.
pub fn url_hash(url: &str) -> String {
    sha1_hex([url])
}
