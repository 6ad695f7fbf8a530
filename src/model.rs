use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Inclusive calendar range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    /// Billed days: both the pick-up and the return day count.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Inclusive-bounds intersection. Sharing a single day is an overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Error for the string-backed enums below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    Available,
    Rented,
    Maintenance,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::Rented => "rented",
            VehicleStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for VehicleStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(VehicleStatus::Available),
            "rented" => Ok(VehicleStatus::Rented),
            "maintenance" => Ok(VehicleStatus::Maintenance),
            _ => Err(UnknownVariant {
                kind: "vehicle status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transmission {
    Manual,
    Automatic,
}

impl Transmission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transmission::Manual => "manual",
            Transmission::Automatic => "automatic",
        }
    }
}

impl FromStr for Transmission {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Transmission::Manual),
            "automatic" => Ok(Transmission::Automatic),
            _ => Err(UnknownVariant {
                kind: "transmission",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Transmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 4] = [
        ReservationStatus::Pending,
        ReservationStatus::Active,
        ReservationStatus::Completed,
        ReservationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled reservations no longer hold the vehicle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Cancelled)
    }

    /// Pending and active reservations block their dates.
    pub fn is_blocking(&self) -> bool {
        !self.is_terminal()
    }
}

impl FromStr for ReservationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "active" => Ok(ReservationStatus::Active),
            "completed" => Ok(ReservationStatus::Completed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            _ => Err(UnknownVariant {
                kind: "reservation status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Ulid,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub license_plate: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub category_id: Ulid,
    pub transmission: Transmission,
    pub daily_rate: Decimal,
    /// Passenger seats.
    pub capacity: u32,
    pub description: String,
    pub status: VehicleStatus,
    pub created_at: DateTime<Utc>,
}

impl Vehicle {
    /// "Brand Model (PLATE)", the label used in listings and reports.
    pub fn display_name(&self) -> String {
        format!("{} {} ({})", self.brand, self.model, self.license_plate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub client: String,
    pub range: DateRange,
    pub days: u32,
    /// Copied from the vehicle when the reservation is priced.
    pub daily_rate: Decimal,
    pub total_amount: Decimal,
    pub status: ReservationStatus,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// A vehicle together with every reservation ever made on it.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle: Vehicle,
    /// Sorted by `range.start`.
    pub reservations: Vec<Reservation>,
}

impl VehicleState {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by range.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.range.start <= reservation.range.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations whose range could intersect `query`. Binary search skips
    /// everything starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start <= query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end >= query.start)
    }

    pub fn has_blocking(&self) -> bool {
        self.reservations.iter().any(|r| r.status.is_blocking())
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CategoryCreated {
        category: Category,
    },
    CategoryUpdated {
        category: Category,
    },
    CategoryDeleted {
        id: Ulid,
    },
    VehicleRegistered {
        vehicle: Vehicle,
    },
    /// Full snapshot of the vehicle after an edit.
    VehicleUpdated {
        vehicle: Vehicle,
    },
    VehicleDeleted {
        id: Ulid,
    },
    VehicleStatusChanged {
        id: Ulid,
        status: VehicleStatus,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationRescheduled {
        id: Ulid,
        vehicle_id: Ulid,
        range: DateRange,
        days: u32,
        daily_rate: Decimal,
        total_amount: Decimal,
        notes: String,
    },
    ReservationStatusChanged {
        id: Ulid,
        vehicle_id: Ulid,
        status: ReservationStatus,
    },
}

impl Event {
    /// Vehicle the event belongs to, if any. Category events have none.
    pub fn vehicle_id(&self) -> Option<Ulid> {
        match self {
            Event::VehicleRegistered { vehicle } | Event::VehicleUpdated { vehicle } => Some(vehicle.id),
            Event::VehicleDeleted { id } | Event::VehicleStatusChanged { id, .. } => Some(*id),
            Event::ReservationCreated { reservation } => Some(reservation.vehicle_id),
            Event::ReservationRescheduled { vehicle_id, .. }
            | Event::ReservationStatusChanged { vehicle_id, .. } => Some(*vehicle_id),
            Event::CategoryCreated { .. }
            | Event::CategoryUpdated { .. }
            | Event::CategoryDeleted { .. } => None,
        }
    }

    /// Short name used as the notification kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::CategoryCreated { .. } => "category_created",
            Event::CategoryUpdated { .. } => "category_updated",
            Event::CategoryDeleted { .. } => "category_deleted",
            Event::VehicleRegistered { .. } => "vehicle_registered",
            Event::VehicleUpdated { .. } => "vehicle_updated",
            Event::VehicleDeleted { .. } => "vehicle_deleted",
            Event::VehicleStatusChanged { .. } => "vehicle_status_changed",
            Event::ReservationCreated { .. } => "reservation_created",
            Event::ReservationRescheduled { .. } => "reservation_rescheduled",
            Event::ReservationStatusChanged { .. } => "reservation_status_changed",
        }
    }
}

// ── Command inputs ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVehicle {
    pub id: Ulid,
    pub license_plate: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub category_id: Ulid,
    pub transmission: Transmission,
    pub daily_rate: Decimal,
    pub capacity: u32,
    pub description: String,
}

/// Partial vehicle edit; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleChanges {
    pub license_plate: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub category_id: Option<Ulid>,
    pub transmission: Option<Transmission>,
    pub daily_rate: Option<Decimal>,
    pub capacity: Option<u32>,
    pub description: Option<String>,
    pub status: Option<VehicleStatus>,
}

impl VehicleChanges {
    pub fn is_empty(&self) -> bool {
        *self == VehicleChanges::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    /// Staff may book on behalf of a client; clients always book for themselves.
    pub client: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub notes: String,
}

// ── Query filters and result types ───────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleFilter {
    pub category_id: Option<Ulid>,
    pub transmission: Option<Transmission>,
    pub status: Option<VehicleStatus>,
    /// Case-insensitive match on brand, model or plate.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub vehicle_id: Option<Ulid>,
    pub client: Option<String>,
    /// Case-insensitive match on client or plate.
    pub search: Option<String>,
    /// Keep reservations starting on or after this day.
    pub start_from: Option<NaiveDate>,
    /// Keep reservations ending on or before this day.
    pub end_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub reservation: Reservation,
    pub vehicle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleUsage {
    pub vehicle_id: Ulid,
    pub vehicle: String,
    pub reservations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyRevenue {
    /// `YYYY-MM`.
    pub month: String,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub total_vehicles: usize,
    pub available_vehicles: usize,
    pub active_reservations: usize,
    pub total_revenue: Decimal,
    pub status_distribution: Vec<(ReservationStatus, usize)>,
    pub top_vehicles: Vec<VehicleUsage>,
    pub monthly_revenue: Vec<MonthlyRevenue>,
}
