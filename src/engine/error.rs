use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::auth::{Capability, Role};
use crate::model::{DateRange, ReservationStatus};

/// Why a candidate reservation was refused. Always recoverable and meant to
/// be shown to whoever made the booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    DateConflict {
        reservation_id: Ulid,
        range: DateRange,
    },
    InvalidRate(Decimal),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidRange { start, end } => {
                write!(f, "end date {end} must be after start date {start}")
            }
            ValidationError::DateConflict {
                reservation_id,
                range,
            } => write!(
                f,
                "vehicle already reserved from {} to {} (reservation {reservation_id})",
                range.start, range.end
            ),
            ValidationError::InvalidRate(rate) => {
                write!(f, "daily rate must be greater than 0, got {rate}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicatePlate(String),
    DuplicateCategory(String),
    InvalidVehicle(&'static str),
    InvalidInput(&'static str),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    NotEditable(ReservationStatus),
    VehicleUnavailable(Ulid),
    VehicleBusy(Ulid),
    InUse(Ulid),
    Forbidden {
        role: Role,
        capability: Capability,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// SQLSTATE reported to pgwire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(ValidationError::DateConflict { .. }) => "23P01",
            EngineError::Validation(_)
            | EngineError::InvalidVehicle(_)
            | EngineError::InvalidInput(_) => "22023",
            EngineError::NotFound(_) => "02000",
            EngineError::AlreadyExists(_)
            | EngineError::DuplicatePlate(_)
            | EngineError::DuplicateCategory(_) => "23505",
            EngineError::InUse(_) => "23503",
            EngineError::Forbidden { .. } => "42501",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
            EngineError::InvalidTransition { .. }
            | EngineError::NotEditable(_)
            | EngineError::VehicleUnavailable(_)
            | EngineError::VehicleBusy(_) => "P0001",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "{e}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicatePlate(plate) => {
                write!(f, "a vehicle with license plate {plate} already exists")
            }
            EngineError::DuplicateCategory(name) => {
                write!(f, "a category named {name} already exists")
            }
            EngineError::InvalidVehicle(msg) => write!(f, "invalid vehicle: {msg}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move reservation from {from} to {to}")
            }
            EngineError::NotEditable(status) => {
                write!(f, "only pending reservations can be edited (status: {status})")
            }
            EngineError::VehicleUnavailable(id) => {
                write!(f, "vehicle {id} is in maintenance and cannot be booked")
            }
            EngineError::VehicleBusy(id) => {
                write!(f, "vehicle {id} is rented; its status follows its reservations")
            }
            EngineError::InUse(id) => write!(f, "{id} is still referenced"),
            EngineError::Forbidden { role, capability } => {
                write!(f, "permission denied: {role} cannot {capability}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}
