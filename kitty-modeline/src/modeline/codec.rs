// Payload codec for environment snapshots
//
// Wire format: base64 (standard alphabet) over newline-joined KEY=VALUE
// records. The same bytes travel over the channel and sit in the handoff file.
// Decoding never fails: anything that does not look like a record is dropped.

use crate::modeline::error::{ModelineError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Upper bound for one encoded payload (one datagram)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

const RECORD_DELIMITER: char = '\n';
const KEY_VALUE_SEPARATOR: char = '=';

/// Ordered key/value pairs captured from the shell's environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    entries: Vec<(String, String)>,
}

impl EnvironmentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment
    pub fn from_current_process() -> Self {
        std::env::vars_os()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.to_string_lossy().into_owned(),
                )
            })
            .collect()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Value of the last entry with this key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for EnvironmentSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Encode a snapshot into a single transferable payload
///
/// Entries whose key is empty or contains `=`, or whose key or value contains a
/// newline, cannot be represented as a record and are skipped.
pub fn encode(snapshot: &EnvironmentSnapshot) -> Result<Vec<u8>> {
    let mut plain = String::new();
    for (key, value) in snapshot.iter() {
        if !is_encodable(key, value) {
            continue;
        }
        if !plain.is_empty() {
            plain.push(RECORD_DELIMITER);
        }
        plain.push_str(key);
        plain.push(KEY_VALUE_SEPARATOR);
        plain.push_str(value);
    }

    let encoded = STANDARD.encode(plain.as_bytes()).into_bytes();
    if encoded.len() > MAX_PAYLOAD_SIZE {
        return Err(ModelineError::PayloadTooLarge {
            size: encoded.len(),
            limit: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(encoded)
}

fn is_encodable(key: &str, value: &str) -> bool {
    !key.is_empty()
        && !key.contains(KEY_VALUE_SEPARATOR)
        && !key.contains(RECORD_DELIMITER)
        && !value.contains(RECORD_DELIMITER)
        && !key.contains('\0')
        && !value.contains('\0')
}

/// Decode a payload into a snapshot
///
/// The payload may carry trailing whitespace or NUL padding (a fixed-size read
/// buffer, a trailing newline from `base64`). Undecodable payloads yield an
/// empty snapshot.
pub fn decode(payload: &[u8]) -> EnvironmentSnapshot {
    let payload = until_nul(payload);
    let trimmed: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let plain = match STANDARD.decode(&trimmed) {
        Ok(bytes) => bytes,
        Err(_) => return EnvironmentSnapshot::default(),
    };

    let plain = String::from_utf8_lossy(until_nul(&plain));
    plain
        .split(RECORD_DELIMITER)
        .filter_map(|record| record.split_once(KEY_VALUE_SEPARATOR))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
