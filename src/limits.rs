use crate::model::{DAY, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single consultation slot never spans more than a day.
pub const MAX_SPAN_DURATION_MS: Ms = DAY;

pub const MAX_SLOTS_PER_EXPERT: usize = 10_000;

pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_MESSAGE_LEN: usize = 4096;

pub const MAX_NOTIFICATION_PAGE: usize = 200;
