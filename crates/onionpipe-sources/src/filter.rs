//! Date filter applied to every source before records reach the buffer

use std::str::FromStr;

use onionpipe_core::Record;
use serde::Deserialize;

/// What to do with records whose date column is empty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndatedPolicy {
    #[default]
    Keep,
    Drop,
}

impl FromStr for UndatedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "drop" => Ok(Self::Drop),
            other => Err(format!("expected keep or drop, got {other:?}")),
        }
    }
}

impl std::fmt::Display for UndatedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Keep => "keep",
            Self::Drop => "drop",
        })
    }
}

/// Year match plus undated policy. Dates are opaque strings; a record is
/// in `year` when its date text contains the four digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub year: Option<i32>,
    pub undated: UndatedPolicy,
}

impl DateFilter {
    pub fn accepts(&self, date: &str) -> bool {
        let date = date.trim();
        if date.is_empty() {
            return self.undated == UndatedPolicy::Keep;
        }
        match self.year {
            Some(year) => date.contains(&year.to_string()),
            None => true,
        }
    }

    /// Keep accepted records; returns them and the number dropped
    pub fn apply(&self, records: Vec<Record>, date_column: &str) -> (Vec<Record>, usize) {
        let before = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|r| self.accepts(r.get(date_column).unwrap_or("")))
            .collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_year_accepts_everything_dated() {
        let filter = DateFilter::default();
        assert!(filter.accepts("2019-01-01"));
        assert!(filter.accepts(""));
    }

    #[test]
    fn year_match_is_substring() {
        let filter = DateFilter {
            year: Some(2025),
            undated: UndatedPolicy::Keep,
        };
        assert!(filter.accepts("2025-04-01"));
        assert!(filter.accepts("01.04.2025"));
        assert!(!filter.accepts("2024-12-31"));
        assert!(filter.accepts("   "));
    }

    #[test]
    fn undated_drop() {
        let filter = DateFilter {
            year: Some(2025),
            undated: UndatedPolicy::Drop,
        };
        let records = vec![
            Record::new().with("Date", "2025-01-01"),
            Record::new().with("Date", ""),
            Record::new(),
            Record::new().with("Date", "2023-01-01"),
        ];
        let (kept, dropped) = filter.apply(records, "Date");
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 3);
    }

    #[test]
    fn policy_parses() {
        assert_eq!("KEEP".parse::<UndatedPolicy>().unwrap(), UndatedPolicy::Keep);
        assert_eq!("drop".parse::<UndatedPolicy>().unwrap(), UndatedPolicy::Drop);
        assert!("maybe".parse::<UndatedPolicy>().is_err());
    }
}
