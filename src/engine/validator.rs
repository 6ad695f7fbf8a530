use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::ValidationError;

/// A booking as proposed by the caller, before it is priced or stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Set when editing, so the reservation does not conflict with itself.
    pub id: Option<Ulid>,
    pub vehicle_id: Ulid,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Candidate {
    pub fn new(vehicle_id: Ulid, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            id: None,
            vehicle_id,
            start,
            end,
        }
    }

    pub fn editing(mut self, id: Ulid) -> Self {
        self.id = Some(id);
        self
    }
}

/// `end` must fall strictly after `start`.
pub fn check_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange, ValidationError> {
    if end <= start {
        return Err(ValidationError::InvalidRange { start, end });
    }
    Ok(DateRange::new(start, end))
}

/// Decide whether `candidate` may be stored next to `existing`.
///
/// Only pending/active reservations of the same vehicle count, and the
/// candidate's own id is skipped. Overlap is inclusive: sharing a single day
/// with another booking is a conflict. Pure; the caller fetches `existing`
/// and persists the outcome.
pub fn validate<'a, I>(candidate: &Candidate, existing: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    let range = check_range(candidate.start, candidate.end)?;

    for other in existing {
        if other.vehicle_id != candidate.vehicle_id
            || !other.status.is_blocking()
            || Some(other.id) == candidate.id
        {
            continue;
        }
        if other.range.overlaps(&range) {
            return Err(ValidationError::DateConflict {
                reservation_id: other.id,
                range: other.range,
            });
        }
    }
    Ok(())
}
