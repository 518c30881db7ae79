// Timestamp-sortable ids (UUIDv7) for accounts and refresh-token rows.
//
// Ids are minted from the service clock rather than the wall clock, so rows
// created under a `ManualClock` still sort in issuance order.

use chrono::{DateTime, Utc};
use uuid::{NoContext, Timestamp, Uuid};

/// UUIDv7 for the current wall-clock time.
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// UUIDv7 whose timestamp portion is `at`. Instants before the Unix epoch
/// clamp to the epoch.
pub fn uuidv7_at(at: DateTime<Utc>) -> Uuid {
    let secs = u64::try_from(at.timestamp()).unwrap_or(0);
    let ts = Timestamp::from_unix(NoContext, secs, at.timestamp_subsec_nanos());
    Uuid::new_v7(ts)
}
