//! Resumption cursors for submission pagination.
//!
//! A [`Cursor`] bounds the submissions already seen on a server. Servers hand
//! cursors back with every page of instance ids and expect them verbatim on
//! the next request, so every variant keeps the raw text it was built from.
//!
//! Ordering is total so that the most advanced cursor of several batches can
//! be picked with [`Cursor::max`], even when batches complete out of order.

mod envelope;

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Seconds since the epoch for 2010-01-01T00:00:00Z, the stand-in update time
/// of timestamped cursors that carry no time component.
const OLD_DATE_EPOCH_SECS: i64 = 1_262_304_000;

/// Update time used to order timestamped cursors that lack one.
pub fn old_date() -> DateTime<Utc> {
    DateTime::from_timestamp(OLD_DATE_EPOCH_SECS, 0).unwrap_or_default()
}

/// Opaque, comparable resumption token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Cursor {
    /// No progress yet. Sorts before every other cursor.
    #[default]
    Empty,
    /// Server update time plus the last returned instance id.
    Timestamped(TimestampedCursor),
    /// Single monotonic numeric id.
    Sequential(SequentialCursor),
    /// Server-defined token with no structure we understand.
    Opaque(String),
}

/// Cursor made of an update time and the last returned instance id.
///
/// Either component may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimestampedCursor {
    raw: String,
    last_update: Option<DateTime<Utc>>,
    last_id: Option<String>,
}

impl TimestampedCursor {
    pub(crate) fn new(
        raw: String,
        last_update: Option<DateTime<Utc>>,
        last_id: Option<String>,
    ) -> Self {
        Self {
            raw,
            last_update,
            last_id,
        }
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    fn effective_update(&self) -> DateTime<Utc> {
        self.last_update.unwrap_or_else(old_date)
    }
}

impl Ord for TimestampedCursor {
    // Equal update times fall back to the last id, then to the raw text.
    fn cmp(&self, other: &Self) -> Ordering {
        self.effective_update()
            .cmp(&other.effective_update())
            .then_with(|| self.last_id.cmp(&other.last_id))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for TimestampedCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cursor holding a single monotonic numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequentialCursor {
    raw: String,
    value: Option<i64>,
}

impl SequentialCursor {
    pub fn value(&self) -> Option<i64> {
        self.value
    }

    fn effective_value(&self) -> i64 {
        self.value.unwrap_or(-1)
    }
}

impl Ord for SequentialCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.effective_value()
            .cmp(&other.effective_value())
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for SequentialCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Cursor {
    /// Classify raw cursor text. Never fails: anything unrecognised is opaque.
    pub fn parse(raw: &str) -> Cursor {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cursor::Empty;
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(value) = trimmed.parse::<i64>() {
                return Cursor::Sequential(SequentialCursor {
                    raw: raw.to_string(),
                    value: Some(value),
                });
            }
        }

        if let Some(cursor) = envelope::parse_xml(raw).or_else(|| envelope::parse_json(raw)) {
            return Cursor::Timestamped(cursor);
        }

        Cursor::Opaque(raw.to_string())
    }

    /// Timestamped cursor starting at `date`, used for "start from date" pulls.
    pub fn from_date(date: DateTime<Utc>) -> Cursor {
        let raw = envelope::render_xml(Some(date), None);
        Cursor::Timestamped(TimestampedCursor::new(raw, Some(date), None))
    }

    /// Timestamped cursor at `date` that resumes after `last_id`.
    pub fn from_date_and_id(date: DateTime<Utc>, last_id: &str) -> Cursor {
        let raw = envelope::render_xml(Some(date), Some(last_id));
        Cursor::Timestamped(TimestampedCursor::new(
            raw,
            Some(date),
            Some(last_id.to_string()),
        ))
    }

    /// Sequential cursor with no value yet; orders as -1.
    pub fn unset_sequential() -> Cursor {
        Cursor::Sequential(SequentialCursor {
            raw: String::new(),
            value: None,
        })
    }

    /// Most advanced cursor of `cursors`, or [`Cursor::Empty`] when there are none.
    pub fn max<I>(cursors: I) -> Cursor
    where
        I: IntoIterator<Item = Cursor>,
    {
        cursors.into_iter().max().unwrap_or_default()
    }

    /// Exact text to send back to the server.
    pub fn value(&self) -> &str {
        match self {
            Cursor::Empty => "",
            Cursor::Timestamped(c) => &c.raw,
            Cursor::Sequential(c) => &c.raw,
            Cursor::Opaque(raw) => raw,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cursor::Empty)
    }

    fn rank(&self) -> u8 {
        match self {
            Cursor::Empty => 0,
            Cursor::Opaque(_) => 1,
            Cursor::Sequential(_) => 2,
            Cursor::Timestamped(_) => 3,
        }
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Cursor::Timestamped(a), Cursor::Timestamped(b)) => a.cmp(b),
            (Cursor::Sequential(a), Cursor::Sequential(b)) => a.cmp(b),
            (Cursor::Opaque(a), Cursor::Opaque(b)) => a.cmp(b),
            // Empty ranks lowest; mixed variants only meet when a server
            // changes cursor format, and then rank by variant.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Empty => write!(f, "empty"),
            Cursor::Timestamped(c) => write!(
                f,
                "timestamped({}, {})",
                c.last_update
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
                c.last_id.as_deref().unwrap_or("-")
            ),
            Cursor::Sequential(c) => match c.value {
                Some(v) => write!(f, "sequential({v})"),
                None => write!(f, "sequential(-)"),
            },
            Cursor::Opaque(raw) => write!(f, "opaque({raw})"),
        }
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.value())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Cursor::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn aggregate_cursor(date: &str, uri: &str) -> String {
        format!(
            "<cursor xmlns=\"http://www.opendatakit.org/cursor\">\
             <attributeName>_LAST_UPDATE_DATE</attributeName>\
             <attributeValue>{date}</attributeValue>\
             <uriLastReturnedValue>{uri}</uriLastReturnedValue>\
             <isForwardCursor>true</isForwardCursor></cursor>"
        )
    }

    #[test]
    fn test_parse_dispatch() {
        assert_eq!(Cursor::parse(""), Cursor::Empty);
        assert_eq!(Cursor::parse("   "), Cursor::Empty);
        assert!(matches!(Cursor::parse("42"), Cursor::Sequential(ref c) if c.value() == Some(42)));
        assert!(matches!(
            Cursor::parse(&aggregate_cursor("2019-03-01T10:00:00.000+0000", "uuid:1")),
            Cursor::Timestamped(_)
        ));
        assert_eq!(
            Cursor::parse("some opaque token"),
            Cursor::Opaque("some opaque token".to_string())
        );
    }

    #[test]
    fn test_parse_malformed_falls_through_to_opaque() {
        for raw in [
            "-5",
            "12abc",
            "99999999999999999999999",
            "<cursor><attributeValue>not a date</attributeValue></cursor>",
            "<cursor></cursor>",
            "<cursor><attributeValue>",
            "{\"other\": 1}",
            "{not json",
        ] {
            assert!(
                matches!(Cursor::parse(raw), Cursor::Opaque(_)),
                "expected opaque for {raw:?}"
            );
        }
    }

    #[test]
    fn test_value_round_trips_verbatim() {
        let raw = aggregate_cursor("2019-03-01T10:00:00.000+0000", "uuid:abc");
        let cursor = Cursor::parse(&raw);
        assert_eq!(cursor.value(), raw);
        assert_eq!(Cursor::parse(" 7 ").value(), " 7 ");
        assert_eq!(Cursor::Empty.value(), "");
    }

    #[test]
    fn test_timestamped_components() {
        let cursor = Cursor::parse(&aggregate_cursor("2019-03-01T10:00:00.000+0000", "uuid:abc"));
        let Cursor::Timestamped(ts) = cursor else {
            panic!("expected timestamped cursor");
        };
        assert_eq!(
            ts.last_update(),
            Some(Utc.with_ymd_and_hms(2019, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(ts.last_id(), Some("uuid:abc"));
    }

    #[test]
    fn test_empty_sorts_first() {
        let cursors = [
            Cursor::parse("1"),
            Cursor::from_date(at(2000, 1, 1)),
            Cursor::Opaque("a".to_string()),
            Cursor::unset_sequential(),
        ];
        for c in cursors {
            assert!(Cursor::Empty < c);
            assert!(c > Cursor::Empty);
        }
        assert_eq!(Cursor::Empty.cmp(&Cursor::Empty), Ordering::Equal);
    }

    #[test]
    fn test_missing_time_uses_sentinel_and_is_antisymmetric() {
        let no_time = Cursor::parse(
            "<cursor><uriLastReturnedValue>uuid:z</uriLastReturnedValue></cursor>",
        );
        let later = Cursor::from_date(at(2015, 6, 1));
        let earlier = Cursor::from_date(at(2005, 6, 1));

        assert_eq!(no_time.cmp(&later), Ordering::Less);
        assert_eq!(later.cmp(&no_time), Ordering::Greater);
        assert_eq!(no_time.cmp(&earlier), Ordering::Greater);
        assert_eq!(earlier.cmp(&no_time), Ordering::Less);
    }

    #[test]
    fn test_missing_id_compares_deterministically() {
        let with_id = Cursor::from_date_and_id(at(2010, 1, 1), "uuid:a");
        let no_id_no_time = Cursor::parse("<cursor><attributeValue></attributeValue><uriLastReturnedValue/></cursor>");
        // Same effective time, the id breaks the tie.
        assert_eq!(no_id_no_time.cmp(&with_id), Ordering::Less);
        assert_eq!(with_id.cmp(&no_id_no_time), Ordering::Greater);
    }

    #[test]
    fn test_equal_timestamps_tie_break_on_last_id() {
        let a = Cursor::from_date_and_id(at(2020, 1, 1), "uuid:a");
        let b = Cursor::from_date_and_id(at(2020, 1, 1), "uuid:b");
        assert!(a < b);
        assert_eq!(Cursor::max(vec![b.clone(), a.clone()]), b);
    }

    #[test]
    fn test_sequential_ordering() {
        let unset = Cursor::unset_sequential();
        let zero = Cursor::parse("0");
        let ten = Cursor::parse("10");
        let nine = Cursor::parse("9");
        assert!(unset < zero);
        assert!(nine < ten);
        assert_eq!(Cursor::max(vec![nine, ten.clone(), zero]), ten);
    }

    #[test]
    fn test_opaque_ordering_is_lexicographic() {
        let a = Cursor::Opaque("abc".to_string());
        let b = Cursor::Opaque("abd".to_string());
        assert!(a < b);
    }

    #[test]
    fn test_max_of_nothing_is_empty() {
        assert_eq!(Cursor::max(Vec::new()), Cursor::Empty);
    }

    #[test]
    fn test_max_picks_latest_regardless_of_order() {
        let c1 = Cursor::from_date_and_id(at(2020, 1, 1), "uuid:1");
        let c2 = Cursor::from_date_and_id(at(2020, 2, 1), "uuid:2");
        let c3 = Cursor::from_date_and_id(at(2020, 3, 1), "uuid:3");
        assert_eq!(
            Cursor::max(vec![c2.clone(), c3.clone(), Cursor::Empty, c1]),
            c3
        );
    }

    #[test]
    fn test_synthesized_cursor_parses_back_equal() {
        let date = Utc.with_ymd_and_hms(2021, 7, 4, 12, 30, 15).unwrap();
        let cursor = Cursor::from_date_and_id(date, "uuid:<&>");
        assert_eq!(Cursor::parse(cursor.value()), cursor);

        let date_only = Cursor::from_date(date);
        assert_eq!(Cursor::parse(date_only.value()), date_only);
    }

    #[test]
    fn test_serde_uses_raw_value() {
        let cursor = Cursor::parse("17");
        let json = serde_json::to_string(&cursor).unwrap();
        assert_eq!(json, "\"17\"");
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cursor);

        let empty: Cursor = serde_json::from_str("\"\"").unwrap();
        assert_eq!(empty, Cursor::Empty);
    }

    #[test]
    fn test_display() {
        assert_eq!(Cursor::Empty.to_string(), "empty");
        assert_eq!(Cursor::parse("3").to_string(), "sequential(3)");
        assert_eq!(Cursor::Opaque("x".into()).to_string(), "opaque(x)");
    }
}
