use crate::model::Ms;

pub const MAX_TENANTS: usize = 10_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_SALESPEOPLE_PER_TENANT: usize = 1_000;
pub const MAX_RULES_PER_SALESPERSON: usize = 64;
pub const MAX_BLACKOUTS_PER_SALESPERSON: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_SALESPERSON: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CONTACT_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_LEAD_ID_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 512;

/// Longest bookable meeting.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Upper bound on the share a single salesperson may be configured with.
pub const MAX_TARGET_SHARE: f64 = 1_000_000.0;
