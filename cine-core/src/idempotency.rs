use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payment::InstrumentKind;

const MAX_CLIENT_KEY_LEN: usize = 64;

/// Per-attempt key sent to the provider so a retried submission of the same
/// attempt is charged once. Distinct attempts always get distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Mint a fresh key: `<instrument>_<unix millis>_<random suffix>`.
    pub fn generate(instrument: InstrumentKind) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}_{}_{}",
            instrument.key_prefix(),
            Utc::now().timestamp_millis(),
            &suffix[..12]
        ))
    }

    /// Accept a key supplied by the caller when it retries an attempt.
    /// Returns `None` for empty, oversized or non `[A-Za-z0-9_-]` keys.
    pub fn from_client(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let well_formed = !raw.is_empty()
            && raw.len() <= MAX_CLIENT_KEY_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
