use chrono::{DateTime, Utc};

/// Current instant, always UTC; the single clock the rest of the crate reads from.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

pub fn to_iso(value: DateTime<Utc>) -> String {
    value.trunc_subsecs(0).to_rfc3339()
}

pub fn parse_iso(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

pub fn minutes_since(iso_time: Option<&str>, now: DateTime<Utc>) -> Option<f64> {
    let parsed = parse_iso(iso_time)?;
    Some((now - parsed).num_milliseconds() as f64 / 60_000.0)
}

pub fn hours_since(iso_time: Option<&str>, now: DateTime<Utc>) -> Option<f64> {
    let parsed = parse_iso(iso_time)?;
    Some((now - parsed).num_milliseconds() as f64 / 3_600_000.0)
}

trait TruncSubsecs {
    fn trunc_subsecs(self, digits: u16) -> Self;
}

impl TruncSubsecs for DateTime<Utc> {
    fn trunc_subsecs(self, digits: u16) -> Self {
        debug_assert_eq!(digits, 0);
        self - chrono::Duration::nanoseconds(self.timestamp_subsec_nanos() as i64)
    }
}
