//! Conversion between UTC timestamps and OAI-PMH datestamp strings
//! (spec.md component A).
//!
//! Grounded on `oaipmh.datestamp` in the original pyoai implementation:
//! datestamps are either `YYYY-MM-DD` or `YYYY-MM-DDThh:mm:ssZ`, always
//! timezone-naive UTC, always truncated to whole seconds.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{OaiError, Result};

/// The datestamp precision a repository or a single request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "YYYY-MM-DD")]
    Day,
    #[serde(rename = "YYYY-MM-DDThh:mm:ssZ")]
    Second,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "YYYY-MM-DD",
            Granularity::Second => "YYYY-MM-DDThh:mm:ssZ",
        }
    }

    pub fn from_wire(s: &str) -> Result<Granularity> {
        match s {
            "YYYY-MM-DD" => Ok(Granularity::Day),
            "YYYY-MM-DDThh:mm:ssZ" => Ok(Granularity::Second),
            other => Err(OaiError::Config(format!(
                "unsupported datestamp granularity reported by repository: {other}"
            ))),
        }
    }
}

/// The granularity a literal datestamp string is written at, inferred
/// from the presence of a `T`.
pub fn granularity_of(datestamp: &str) -> Granularity {
    if datestamp.contains('T') {
        Granularity::Second
    } else {
        Granularity::Day
    }
}

/// Serialize a timezone-naive timestamp at the given granularity.
///
/// Seconds precision always renders with a trailing `Z`; day precision
/// drops the time component entirely, matching
/// `datetime_to_datestamp`'s `result[:-10]` slice in the original.
pub fn serialize(dt: NaiveDateTime, granularity: Granularity) -> String {
    match granularity {
        Granularity::Second => format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S")),
        Granularity::Day => dt.format("%Y-%m-%d").to_string(),
    }
}

/// Parse a datestamp of either granularity.
///
/// `inclusive` controls the time filled in when only a date is given:
/// `23:59:59` (used for an `until` bound, matching the original's
/// `inclusive=True` path) or `00:00:00` otherwise.
///
/// Tolerates a fractional-seconds tail before the `Z` (`.000`), which
/// some DSpace repositories emit even though the protocol forbids it —
/// the original pyoai strips this explicitly.
pub fn parse(datestamp: &str, inclusive: bool) -> Result<NaiveDateTime> {
    let invalid = || OaiError::Datestamp(datestamp.to_string());

    let mut parts = datestamp.splitn(2, 'T');
    let date_part = parts.next().ok_or_else(invalid)?;
    let time_part = parts.next();

    let date = parse_date(date_part).ok_or_else(invalid)?;

    let time = match time_part {
        Some(t) => {
            let t = t.strip_suffix('Z').ok_or_else(invalid)?;
            if t.is_empty() {
                return Err(invalid());
            }
            // Drop a fractional-second tail like "14:35:10.123" -> "14:35:10".
            let t = t.split('.').next().ok_or_else(invalid)?;
            parse_time(t).ok_or_else(invalid)?
        }
        None => {
            if inclusive {
                NaiveTime::from_hms_opt(23, 59, 59).unwrap()
            } else {
                NaiveTime::from_hms_opt(0, 0, 0).unwrap()
            }
        }
    };

    Ok(NaiveDateTime::new(date, time))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let fields: Vec<&str> = s.split('-').collect();
    if fields.len() != 3 {
        return None;
    }
    let year: i32 = fields[0].parse().ok()?;
    let month: u32 = fields[1].parse().ok()?;
    let day: u32 = fields[2].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() != 3 {
        return None;
    }
    let hour: u32 = fields[0].parse().ok()?;
    let min: u32 = fields[1].parse().ok()?;
    let sec: u32 = fields[2].parse().ok()?;
    NaiveTime::from_hms_opt(hour, min, sec)
}

/// A lenient parser for datestamps embedded in record *content*, not
/// protocol datestamps. Accepts partial dates (`YYYY`, `YYYY-MM`) by
/// defaulting the missing fields to `01`. Not used by the protocol
/// engine itself — see SPEC_FULL.md §4 — but exposed for metadata
/// readers that need to make sense of looser dates in harvested records.
pub fn parse_tolerant(datestamp: &str) -> Result<NaiveDateTime> {
    let invalid = || OaiError::Datestamp(datestamp.to_string());

    let mut parts = datestamp.splitn(2, 'T');
    let date_part = parts.next().ok_or_else(invalid)?;
    let time_part = parts.next();

    let fields: Vec<&str> = date_part.split('-').collect();
    let (year, month, day) = match fields.as_slice() {
        [y] => (*y, "01", "01"),
        [y, m] => (*y, *m, "01"),
        [y, m, d] => (*y, *m, *d),
        _ => return Err(invalid()),
    };
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let day: u32 = day.parse().map_err(|_| invalid())?;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;

    let time = match time_part {
        Some(t) => {
            let t = t.strip_suffix('Z').ok_or_else(invalid)?;
            parse_time(t).ok_or_else(invalid)?
        }
        None => NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
    };

    Ok(NaiveDateTime::new(date, time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn strict_parse_second_granularity() {
        assert_eq!(
            parse("2005-07-04T14:35:10Z", false).unwrap(),
            dt(2005, 7, 4, 14, 35, 10)
        );
        assert_eq!(
            parse("2005-01-24T14:34:02Z", false).unwrap(),
            dt(2005, 1, 24, 14, 34, 2)
        );
    }

    #[test]
    fn strict_parse_day_granularity() {
        assert_eq!(parse("2005-07-04", false).unwrap(), dt(2005, 7, 4, 0, 0, 0));
    }

    #[test]
    fn strict_parse_day_granularity_inclusive() {
        assert_eq!(
            parse("2009-11-16", true).unwrap(),
            dt(2009, 11, 16, 23, 59, 59)
        );
    }

    #[test]
    fn rejects_malformed_datestamps() {
        for bad in [
            "2005",
            "2005-07-04Z",
            "2005-07",
            "2005-07-04T",
            "2005-07-04T14:00Z",
            "2005-07-04T14:00:00",
            "aaaa-bb-cc",
            "foo",
        ] {
            assert!(parse(bad, false).is_err(), "expected {bad} to be rejected");
        }
    }

    #[test]
    fn datestamp_error_carries_the_offending_string() {
        match parse("foo", false) {
            Err(OaiError::Datestamp(s)) => assert_eq!(s, "foo"),
            other => panic!("expected Datestamp error, got {other:?}"),
        }
    }

    #[test]
    fn tolerates_fractional_seconds_from_dspace() {
        assert_eq!(
            parse("2005-07-04T14:35:10.123Z", false).unwrap(),
            dt(2005, 7, 4, 14, 35, 10)
        );
    }

    #[test]
    fn round_trip_second_granularity() {
        let original = dt(2005, 7, 4, 14, 35, 10);
        let s = serialize(original, Granularity::Second);
        assert_eq!(s, "2005-07-04T14:35:10Z");
        assert_eq!(parse(&s, false).unwrap(), original);
    }

    #[test]
    fn round_trip_day_granularity() {
        let original = dt(2005, 7, 4, 0, 0, 0);
        let s = serialize(original, Granularity::Day);
        assert_eq!(s, "2005-07-04");
        assert_eq!(parse(&s, false).unwrap(), original);
    }

    #[test]
    fn granularity_of_detects_time_component() {
        assert_eq!(granularity_of("2005-07-04"), Granularity::Day);
        assert_eq!(
            granularity_of("2005-07-04T14:35:10Z"),
            Granularity::Second
        );
    }

    #[test]
    fn tolerant_parser_fills_in_missing_fields() {
        assert_eq!(parse_tolerant("2005").unwrap(), dt(2005, 1, 1, 0, 0, 0));
        assert_eq!(parse_tolerant("2005-02").unwrap(), dt(2005, 2, 1, 0, 0, 0));
        assert_eq!(
            parse_tolerant("2005-07-04T14:35:10Z").unwrap(),
            dt(2005, 7, 4, 14, 35, 10)
        );
    }
}
