/// Longest guest name accepted for a reservation, in characters.
pub const MAX_NAME_LEN: usize = 128;

/// Largest party size accepted for a single reservation.
pub const MAX_PARTY_SIZE: u32 = 99;

/// Longest table id accepted from the store.
pub const MAX_TABLE_ID_LEN: usize = 64;

/// Party size used when a booking or reserve action does not carry one.
pub const DEFAULT_PARTY_SIZE: u32 = 2;

/// Guest name used when a reserve action does not carry one.
pub const DEFAULT_RESERVATION_NAME: &str = "Reservierung";
