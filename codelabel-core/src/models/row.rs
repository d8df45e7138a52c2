use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized row identifier shared by the raw and coded datasets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    /// Normalize a raw cell value into an id. Spreadsheet exports often turn
    /// integer ids into floats, so `12345.0` and `12345` map to the same id.
    /// Returns `None` for blank cells.
    pub fn normalize(raw: &str) -> Option<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (s, None),
        };
        let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        let zero_fraction =
            frac_part.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b == b'0'));
        if all_digits(int_part) && zero_fraction {
            let trimmed = int_part.trim_start_matches('0');
            let digits = if trimmed.is_empty() { "0" } else { trimmed };
            return Some(Self(digits.to_string()));
        }

        // Scientific notation and the like: collapse exact integers only.
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
                return Some(Self(format!("{}", f as i64)));
            }
        }

        Some(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One code-change observation from the raw dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: RowId,
    pub text: String,
}
