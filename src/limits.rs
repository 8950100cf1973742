// Hard caps on client-controlled sizes. Anything above these is rejected with
// `LedgerError::LimitExceeded` before it reaches the store.

pub const MAX_EVENT_ID_LEN: usize = 128;
pub const MAX_USER_ID_LEN: usize = 256;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ROW_LABEL_LEN: usize = 8;

pub const MAX_TIERS_PER_EVENT: usize = 32;
pub const MAX_ROWS_PER_EVENT: usize = 256;
pub const MAX_SEATS_PER_ROW: u16 = 500;

pub const MAX_SEATS_PER_BOOKING: usize = 20;
pub const MAX_TOKEN_LEN: usize = 256;
