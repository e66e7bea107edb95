use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const K: u64 = 1024;
const M: u64 = K * 1024;
const G: u64 = M * 1024;

/// A byte count written the short way: `5m`, `1g512m`, `3k7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseSizeError {
    #[error("empty size")]
    Empty,
    #[error("invalid size {0:?}")]
    Invalid(String),
    #[error("size {0:?} overflows")]
    Overflow(String),
}

impl ByteSize {
    pub fn get(self) -> u64 { self.0 }
}

impl From<u64> for ByteSize {
    fn from(n: u64) -> Self { Self(n) }
}

impl FromStr for ByteSize {
    type Err = ParseSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return Err(ParseSizeError::Empty);
        }
        let invalid = || ParseSizeError::Invalid(s.to_string());
        let overflow = || ParseSizeError::Overflow(s.to_string());

        let mut total: u64 = 0;
        let mut rest = lower.as_str();
        while !rest.is_empty() {
            let (digits, unit, tail) = match rest.find(['g', 'm', 'k', 'b']) {
                Some(i) => (&rest[..i], &rest[i..=i], &rest[i + 1..]),
                None => (rest, "b", ""),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let value: u64 = digits.parse().map_err(|_| overflow())?;
            let mul = match unit {
                "g" => G,
                "m" => M,
                "k" => K,
                _ => 1,
            };
            let part = value.checked_mul(mul).ok_or_else(overflow)?;
            total = total.checked_add(part).ok_or_else(overflow)?;
            rest = tail;
        }
        Ok(Self(total))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut v = self.0;
        if v == 0 {
            return f.write_str("0b");
        }
        for (unit, tag) in [(G, 'g'), (M, 'm'), (K, 'k')] {
            if v >= unit {
                write!(f, "{}{}", v / unit, tag)?;
                v %= unit;
            }
        }
        if v > 0 {
            write!(f, "{v}b")?;
        }
        Ok(())
    }
}

/// Render a duration at second precision, e.g. `1h2m3s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
