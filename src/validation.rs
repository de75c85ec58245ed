use std::fmt;

use crate::error::{Error, Result};

const FINGERPRINT_LEN: usize = 40;

/// A key identifier as gpg prints it and accepts it back on `--recv-keys`.
///
/// gpg reports the signer of an unverifiable signature as a 16 digit long
/// key ID in `NO_PUBKEY`, and imported keys as a 40 digit fingerprint in
/// `IMPORT_OK`. Users also paste short IDs, `0x`-prefixed IDs, and the
/// fingerprint in the grouped form `gpg --fingerprint` shows. All of these
/// normalize to bare uppercase hex, which is also what the confirmation
/// challenge is taken from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyId(String);

impl KeyId {
    pub fn parse(key_id: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidKeyId {
            key_id: key_id.to_string(),
            reason,
        };

        let trimmed = key_id.trim();
        let bare = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if bare.is_empty() {
            return Err(invalid("no key ID given".to_string()));
        }

        let digits: String = if bare.contains(' ') {
            let joined: String = bare.split(' ').collect();
            if joined.len() != FINGERPRINT_LEN {
                return Err(invalid(
                    "only a full fingerprint may be written in groups".to_string(),
                ));
            }
            joined
        } else {
            bare.to_string()
        };

        if let Some(c) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(invalid(format!("{c:?} is not a hex digit")));
        }

        match digits.len() {
            8 | 16 | FINGERPRINT_LEN => Ok(Self(digits.to_ascii_uppercase())),
            len => Err(invalid(format!(
                "gpg identifies keys by 8, 16 or 40 hex digits, got {len}"
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for a full 40 digit fingerprint.
    pub fn is_fingerprint(&self) -> bool {
        self.0.len() == FINGERPRINT_LEN
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<KeyId> for String {
    fn from(key_id: KeyId) -> Self {
        key_id.0
    }
}

/// Rejects keyserver values gpg could mistake for options.
pub fn validate_keyserver(keyserver: &str) -> Result<&str> {
    let reason = if keyserver.is_empty() {
        Some("keyserver cannot be empty")
    } else if keyserver.starts_with('-') {
        Some("keyserver cannot start with '-'")
    } else if keyserver.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("keyserver cannot contain whitespace or control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidKeyserver {
            keyserver: keyserver.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(keyserver),
    }
}
