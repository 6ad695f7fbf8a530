//! Hard caps on catalog size and user-supplied text. Checked before anything
//! reaches the WAL.

pub const MAX_CATEGORIES: usize = 1_000;
pub const MAX_VEHICLES: usize = 100_000;
pub const MAX_RESERVATIONS_PER_VEHICLE: usize = 10_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_PLATE_LEN: usize = 20;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_CLIENT_LEN: usize = 150;

/// Longest bookable stay, in billed days.
pub const MAX_RENTAL_DAYS: i64 = 3_660;

pub const MIN_VEHICLE_YEAR: i32 = 1900;
pub const MAX_VEHICLE_CAPACITY: u32 = 100;
