//! Opaque identifiers for stored images
//!
//! An identifier is the only handle a client ever gets for its image, and
//! its first four characters pick the shard directory the file lives in.
//!
//! Identifiers are 12 hex characters (48 bits), the width existing stores
//! and clients expect. That is half of the 24-character tokens earlier
//! deployments minted and well under the 128 bits a pure capability handle
//! would want; guessing stays impractical only because each file is served
//! once and deleted. Raising [`ID_BYTES`] widens new identifiers; lookups
//! accept any well-formed identifier at least [`ID_LEN`] long.

use rand::rngs::OsRng;
use rand::TryRngCore;
use thiserror::Error;

/// Number of random bytes behind every identifier handed out by the pipeline.
pub const ID_BYTES: usize = 6;

/// Length in hex characters of a full identifier.
pub const ID_LEN: usize = ID_BYTES * 2;

/// The OS entropy source could not be read
#[derive(Error, Debug)]
#[error("Entropy source unavailable: {0}")]
pub struct EntropyError(String);

/// Generate a lowercase hex token from `len` cryptographically random bytes.
///
/// The result is `2 * len` characters long.
pub fn generate(len: usize) -> Result<String, EntropyError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| EntropyError(e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Check that `id` looks like something [`generate`] could have produced:
/// at least [`ID_LEN`] characters, lowercase hex only.
pub fn is_well_formed(id: &str) -> bool {
    id.len() >= ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_length() {
        let id = generate(ID_BYTES).unwrap();
        assert_eq!(id.len(), ID_LEN);
        assert!(is_well_formed(&id));
    }

    #[test]
    fn test_generate_lowercase_hex() {
        let id = generate(32).unwrap();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_generate_does_not_repeat() {
        let ids: HashSet<String> = (0..1000).map(|_| generate(16).unwrap()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed("0123456789ab"));
        assert!(is_well_formed("0123456789abcdef"));
        assert!(!is_well_formed("0123456789a"));
        assert!(!is_well_formed("0123456789AB"));
        assert!(!is_well_formed("../../etc/passwd"));
        assert!(!is_well_formed("0123456789ab.png"));
    }
}
