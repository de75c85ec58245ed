use chrono::NaiveDate;
use tracing::debug;

use crate::types::{Key, KeyValidity};

/// Parses `gpg --list-keys --with-colons --fixed-list-mode` output.
///
/// Only primary keys are returned. Subkey records end the primary key's
/// section, so a subkey fingerprint is never mistaken for the primary one.
pub fn parse_keys(output: &str) -> Vec<Key> {
    let mut keys = Vec::new();
    let mut current: Option<Key> = None;
    let mut in_primary = false;

    for line in output.lines() {
        let fields: Vec<&str> = line.trim_end_matches('\r').split(':').collect();

        match fields[0] {
            "pub" => {
                finish(&mut keys, current.take());
                current = Some(primary_key(&fields));
                in_primary = true;
            }
            "fpr" if in_primary => {
                if let Some(key) = current.as_mut()
                    && key.fingerprint.is_empty()
                    && let Some(fpr) = fields.get(9)
                {
                    key.fingerprint = fpr.to_string();
                }
            }
            "uid" => {
                if let Some(key) = current.as_mut()
                    && let Some(uid) = fields.get(9).filter(|u| !u.is_empty())
                {
                    key.uids.push(uid.to_string());
                }
            }
            "sub" | "ssb" => in_primary = false,
            "" => {}
            other => debug!(record_type = other, "skipping GPG record"),
        }
    }

    finish(&mut keys, current);
    keys
}

fn finish(keys: &mut Vec<Key>, key: Option<Key>) {
    match key {
        Some(key) if !key.fingerprint.is_empty() => keys.push(key),
        Some(key) => debug!(key_id = %key.key_id, "skipping key without fingerprint"),
        None => {}
    }
}

fn primary_key(fields: &[&str]) -> Key {
    let field = |i: usize| fields.get(i).copied().unwrap_or_default();

    Key {
        fingerprint: String::new(),
        key_id: field(4).to_string(),
        uids: Vec::new(),
        algorithm: algorithm_name(field(3)),
        bits: field(2).parse().unwrap_or(0),
        created: parse_timestamp(field(5)),
        expires: parse_timestamp(field(6)),
        validity: field(1)
            .chars()
            .next()
            .map(KeyValidity::from_gpg_char)
            .unwrap_or_default(),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDate> {
    s.parse::<i64>()
        .ok()
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.date_naive())
}

// RFC 4880 / RFC 9580 public-key algorithm IDs.
fn algorithm_name(code: &str) -> String {
    match code {
        "1" | "2" | "3" => "RSA".to_string(),
        "16" | "20" => "Elgamal".to_string(),
        "17" => "DSA".to_string(),
        "18" => "ECDH".to_string(),
        "19" => "ECDSA".to_string(),
        "22" => "EdDSA".to_string(),
        "" => String::new(),
        other => format!("ALG{other}"),
    }
}
