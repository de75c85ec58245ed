use chrono::NaiveDate;

use crate::process::ProcessResult;

/// A public key found in a scoped keyring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub fingerprint: String,
    /// Long (16 hex character) key ID.
    pub key_id: String,
    pub uids: Vec<String>,
    pub algorithm: String,
    pub bits: u32,
    pub created: Option<NaiveDate>,
    pub expires: Option<NaiveDate>,
    pub validity: KeyValidity,
}

/// GPG key validity, from field 2 of a `--with-colons` record.
///
/// Keys fetched into a scoped keyring are not signed by anything the keyring
/// trusts, so `Unknown` is the common case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum KeyValidity {
    #[default]
    Unknown,
    Undefined,
    Never,
    Marginal,
    Full,
    Ultimate,
    Expired,
    Revoked,
    Invalid,
}

impl KeyValidity {
    pub fn from_gpg_char(c: char) -> Self {
        match c {
            'q' => Self::Undefined,
            'n' => Self::Never,
            'm' => Self::Marginal,
            'f' => Self::Full,
            'u' => Self::Ultimate,
            'e' => Self::Expired,
            'r' => Self::Revoked,
            'i' => Self::Invalid,
            _ => Self::Unknown,
        }
    }

    /// Whether gpg would still use the key for verification.
    pub fn is_usable(self) -> bool {
        !matches!(self, Self::Expired | Self::Revoked | Self::Invalid)
    }
}

/// Which standard stream receives echoed status lines in verbose mode.
///
/// Mirrors the `--status-fd` value tools like git pass to their gpg program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFd {
    Stdout,
    Stderr,
}

impl StatusFd {
    /// Maps a descriptor number; only 1 and 2 are meaningful.
    pub fn from_fd(fd: i32) -> Option<Self> {
        match fd {
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// Options for [`ScopedGpg::verify`](crate::ScopedGpg::verify).
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Echo gpg's stdout and stderr to ours.
    pub verbose: bool,
    /// Where to echo status lines when `verbose` is set.
    pub status_fd: Option<StatusFd>,
}

/// A successful verification.
#[derive(Debug, Clone)]
pub struct Verified {
    /// Key IDs imported into the real keyring during this call.
    pub imported: Vec<String>,
    /// Output of the final, successful `--verify` run.
    pub output: ProcessResult,
}
