//! Recognizes the `[GNUPG:]` status lines this crate acts on.
//!
//! Everything else gpg writes to its status channel is ignored.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\[GNUPG:\] (IMPORT_OK|IMPORT_PROBLEM) (.*?)\r?$")
        .expect("import status pattern is valid")
});

static NO_PUBKEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\[GNUPG:\] NO_PUBKEY (.*?)\r?$").expect("no-pubkey status pattern is valid")
});

/// A trust-relevant event reported by gpg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// The fetched key was imported; carries its full fingerprint.
    ImportOk { fingerprint: String },
    /// gpg refused or failed to import the fetched key.
    ImportProblem { detail: String },
    /// Verification could not find the signer's key in the keyring.
    NoPublicKey { key_id: String },
}

/// Finds the outcome of a `--recv-keys` run.
///
/// Returns `Ok(None)` when no import line is present. An `IMPORT_OK` line
/// without a fingerprint is reported as [`Error::ProtocolMismatch`].
pub fn find_import_event(status: &str) -> Result<Option<StatusEvent>> {
    let Some(caps) = IMPORT_RE.captures(status) else {
        return Ok(None);
    };
    let detail = caps[2].trim();

    if &caps[1] == "IMPORT_PROBLEM" {
        return Ok(Some(StatusEvent::ImportProblem {
            detail: detail.to_string(),
        }));
    }

    // IMPORT_OK <reason> <fingerprint>
    match detail.split(' ').nth(1).filter(|f| !f.is_empty()) {
        Some(fingerprint) => Ok(Some(StatusEvent::ImportOk {
            fingerprint: fingerprint.to_string(),
        })),
        None => Err(Error::ProtocolMismatch(status.to_string())),
    }
}

/// Finds the [`StatusEvent::NoPublicKey`] of a `--verify` run.
///
/// The key id is kept as gpg wrote it; the caller decides whether it is a
/// usable [`KeyId`](crate::KeyId).
pub fn find_missing_key(status: &str) -> Option<StatusEvent> {
    NO_PUBKEY_RE
        .captures(status)
        .map(|caps| caps[1].trim().to_string())
        .filter(|key_id| !key_id.is_empty())
        .map(|key_id| StatusEvent::NoPublicKey { key_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINGERPRINT: &str = "96E07AF25771955980DAD10020D04E5A713660A7";

    #[test]
    fn test_import_ok() {
        let status = format!(
            "[GNUPG:] KEY_CONSIDERED {FINGERPRINT} 0\n[GNUPG:] IMPORTED 20D04E5A713660A7 Fedor\n[GNUPG:] IMPORT_OK 1 {FINGERPRINT}\n[GNUPG:] IMPORT_RES 1 0 1 0 0 0 0 0 0 0 0 0 0 0 0\n"
        );
        assert_eq!(
            find_import_event(&status).unwrap(),
            Some(StatusEvent::ImportOk {
                fingerprint: FINGERPRINT.to_string()
            })
        );
    }

    #[test]
    fn test_import_ok_crlf() {
        let status = format!("[GNUPG:] IMPORT_OK 1 {FINGERPRINT}\r\n[GNUPG:] IMPORT_RES 1\r\n");
        assert_eq!(
            find_import_event(&status).unwrap(),
            Some(StatusEvent::ImportOk {
                fingerprint: FINGERPRINT.to_string()
            })
        );
    }

    #[test]
    fn test_import_ok_without_trailing_newline() {
        let status = format!("[GNUPG:] IMPORT_OK 0 {FINGERPRINT}");
        assert!(matches!(
            find_import_event(&status).unwrap(),
            Some(StatusEvent::ImportOk { .. })
        ));
    }

    #[test]
    fn test_import_problem() {
        let status = "[GNUPG:] IMPORT_PROBLEM 1 AAAA\n";
        assert_eq!(
            find_import_event(status).unwrap(),
            Some(StatusEvent::ImportProblem {
                detail: "1 AAAA".to_string()
            })
        );
    }

    #[test]
    fn test_import_ok_missing_fingerprint_is_mismatch() {
        let err = find_import_event("[GNUPG:] IMPORT_OK 1\n").unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch(raw) if raw.contains("IMPORT_OK")));
    }

    #[test]
    fn test_no_import_event() {
        assert_eq!(find_import_event("").unwrap(), None);
        assert_eq!(
            find_import_event("[GNUPG:] IMPORT_RES 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n").unwrap(),
            None
        );
    }

    #[test]
    fn test_line_anchored() {
        let status = "noise [GNUPG:] IMPORT_OK 1 ABCD\n";
        assert_eq!(find_import_event(status).unwrap(), None);
        assert_eq!(find_missing_key("x[GNUPG:] NO_PUBKEY 20D04E5A713660A7"), None);
    }

    fn no_public_key(key_id: &str) -> Option<StatusEvent> {
        Some(StatusEvent::NoPublicKey {
            key_id: key_id.to_string(),
        })
    }

    #[test]
    fn test_missing_key() {
        let status = "[GNUPG:] NEWSIG\n[GNUPG:] ERRSIG 20D04E5A713660A7 1 8 00 1465241230 9 -\n[GNUPG:] NO_PUBKEY 20D04E5A713660A7\n";
        assert_eq!(find_missing_key(status), no_public_key("20D04E5A713660A7"));
    }

    #[test]
    fn test_missing_key_crlf_first_match() {
        let status = "[GNUPG:] NO_PUBKEY 1111111111111111\r\n[GNUPG:] NO_PUBKEY 2222222222222222\r\n";
        assert_eq!(find_missing_key(status), no_public_key("1111111111111111"));
    }

    #[test]
    fn test_missing_key_is_reported_verbatim() {
        let status = "[GNUPG:] NO_PUBKEY not-a-key-id\n";
        assert_eq!(find_missing_key(status), no_public_key("not-a-key-id"));
        assert_eq!(find_missing_key("[GNUPG:] NO_PUBKEY \n"), None);
    }

    #[test]
    fn test_good_signature_has_no_missing_key() {
        let status = format!("[GNUPG:] NEWSIG\n[GNUPG:] GOODSIG 20D04E5A713660A7 Fedor\n[GNUPG:] VALIDSIG {FINGERPRINT}\n");
        assert_eq!(find_missing_key(&status), None);
        assert_eq!(find_missing_key("garbage\nmore garbage"), None);
    }
}
