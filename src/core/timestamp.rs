use chrono::{DateTime, Utc};

// Wall-clock helpers. Used for naming and display only; segment ageing runs on
// `std::time::Instant`.

pub fn utc_ns_now() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .map(|ns| ns.max(0) as u64)
        .unwrap_or_default()
}

pub fn unix_ms_now() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// ISO-8601 with `:` and `.` replaced so the result is safe in file names,
/// e.g. `2024-05-01T12-30-05-123Z`.
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

pub fn file_stamp_now() -> String {
    file_stamp(Utc::now())
}
