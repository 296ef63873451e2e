use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Number of trailing characters left visible when a value is long enough.
const VISIBLE_TAIL: usize = 4;

/// Values this short are fully hidden (OTPs, CVVs).
const MIN_LEN_FOR_TAIL: usize = 9;

/// A wrapper for payment credentials (card numbers, phones, OTPs, provider
/// tokens) that never prints its value through `Debug` or `Display`.
///
/// Serialization passes the real value through, since the wrapped data still
/// has to reach the payment provider.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: fmt::Display> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Masked({})", redact(&self.0.to_string()))
    }
}

impl<T: fmt::Display> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(&self.0.to_string()))
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Replaces every character with `*`, keeping the last four visible for
/// values of nine characters or more.
pub fn redact(raw: &str) -> String {
    let len = raw.chars().count();
    if len < MIN_LEN_FOR_TAIL {
        return "*".repeat(len);
    }
    let hidden = len - VISIBLE_TAIL;
    raw.chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { '*' } else { c })
        .collect()
}
