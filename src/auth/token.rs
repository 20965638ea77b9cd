use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const TOKEN_PREFIX: &str = "rt";
const LOOKUP_LENGTH: usize = 8;
const SECRET_LENGTH: usize = 32;

/// Generates a new app session token with the format `rt_<lookup>_<secret>`.
/// Returns `(raw_token, digest)`; only the digest is ever stored.
#[must_use]
pub fn generate_session_token() -> (String, String) {
    let lookup = uuid::Uuid::new_v4().simple().to_string()[..LOOKUP_LENGTH].to_string();
    let secret = uuid::Uuid::new_v4().simple().to_string();
    let raw = format!("{TOKEN_PREFIX}_{lookup}_{secret}");
    let digest = digest_token(&raw);
    (raw, digest)
}

/// Lowercase hex SHA-256 of a raw token.
#[must_use]
pub fn digest_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Compares two digests without short-circuiting on the first difference.
#[must_use]
pub fn digests_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Checks the shape of a session token before it is looked up.
pub fn parse_session_token(token: &str) -> Result<()> {
    let mut parts = token.split('_');
    let (Some(prefix), Some(lookup), Some(secret), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::invalid("malformed session token"));
    };
    if prefix != TOKEN_PREFIX
        || lookup.len() != LOOKUP_LENGTH
        || secret.len() != SECRET_LENGTH
        || !lookup.chars().chain(secret.chars()).all(|c| c.is_ascii_hexdigit())
    {
        return Err(Error::invalid("malformed session token"));
    }
    Ok(())
}
