pub mod communication;
pub mod consent_link;
pub mod participation;
pub mod visit;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Terminal state of one staging row. Whatever happened, the batch moves on
/// to the next row; the driver renders the outcome as a per-row status string.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Migrated,
    /// A guard declined the write (already linked, already on study, ...).
    Skipped(String),
    /// Validation, resolution or the primary write failed.
    Failed(String),
}

impl Outcome {
    pub fn is_migrated(&self) -> bool {
        matches!(self, Outcome::Migrated)
    }

    pub fn into_message(self) -> String {
        match self {
            Outcome::Migrated => "migrated".to_string(),
            Outcome::Skipped(msg) | Outcome::Failed(msg) => msg,
        }
    }
}

/// Source extracts carry dates in a handful of shapes; try them in order.
pub fn parse_source_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

pub fn parse_source_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    None
}

/// Combine separate date and time source fields. The date is required; a
/// missing or unparseable time falls back to midnight.
pub fn parse_source_date_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = parse_source_date(date)?;
    let time = parse_source_time(time).unwrap_or(NaiveTime::MIN);
    Some(date.and_time(time))
}

pub fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2021, 1, 5).unwrap();
        assert_eq!(parse_source_date("2021-01-05"), Some(expected));
        assert_eq!(parse_source_date("05-01-2021"), Some(expected));
        assert_eq!(parse_source_date("05/01/2021"), Some(expected));
        assert_eq!(parse_source_date("not a date"), None);
        assert_eq!(parse_source_date(""), None);
    }

    #[test]
    fn missing_time_falls_back_to_midnight() {
        let dt = parse_source_date_time("2021-01-05", "").expect("date");
        assert_eq!(dt.format("%H:%M:%S").to_string(), "00:00:00");
        let dt = parse_source_date_time("2021-01-05", "09:00").expect("date");
        assert_eq!(dt.format("%H:%M").to_string(), "09:00");
    }

    #[test]
    fn date_is_required() {
        assert_eq!(parse_source_date_time("", "09:00"), None);
    }
}
