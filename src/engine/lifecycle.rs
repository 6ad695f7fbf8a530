use crate::model::*;

use super::EngineError;

/// What the vehicle should do after a reservation changes status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleEffect {
    None,
    Release,
}

/// Reservation state machine.
///
/// ```text
/// pending ──► active ──► completed
///    │           │
///    └──► cancelled ◄──┘
/// ```
///
/// `pending → completed` is refused: a rental has to be picked up before it
/// can be returned.
pub fn check_transition(
    from: ReservationStatus,
    to: ReservationStatus,
) -> Result<VehicleEffect, EngineError> {
    use ReservationStatus::*;
    let allowed = matches!(
        (from, to),
        (Pending, Active) | (Pending, Cancelled) | (Active, Completed) | (Active, Cancelled)
    );
    if !allowed {
        return Err(EngineError::InvalidTransition { from, to });
    }
    Ok(if to.is_terminal() {
        VehicleEffect::Release
    } else {
        VehicleEffect::None
    })
}

/// Status the vehicle takes when a reservation is created on it.
/// `None` means the vehicle keeps its current status.
pub fn on_reserved(current: VehicleStatus) -> Option<VehicleStatus> {
    match current {
        VehicleStatus::Available => Some(VehicleStatus::Rented),
        VehicleStatus::Rented | VehicleStatus::Maintenance => None,
    }
}

/// Status the vehicle takes when released. Releasing an available vehicle is
/// a no-op, and a vehicle pulled into maintenance stays there.
pub fn on_released(current: VehicleStatus) -> Option<VehicleStatus> {
    match current {
        VehicleStatus::Rented => Some(VehicleStatus::Available),
        VehicleStatus::Available | VehicleStatus::Maintenance => None,
    }
}

/// Manual status change by fleet staff. Only the maintenance toggle is
/// manual; rented follows the reservations.
pub fn check_manual_status(
    vehicle: &Vehicle,
    to: VehicleStatus,
) -> Result<Option<VehicleStatus>, EngineError> {
    match (vehicle.status, to) {
        (from, to) if from == to => Ok(None),
        (VehicleStatus::Available, VehicleStatus::Maintenance)
        | (VehicleStatus::Maintenance, VehicleStatus::Available) => Ok(Some(to)),
        (VehicleStatus::Rented, _) => Err(EngineError::VehicleBusy(vehicle.id)),
        (_, VehicleStatus::Rented) => Err(EngineError::InvalidVehicle(
            "rented status is set by reservations",
        )),
        _ => Err(EngineError::InvalidVehicle("unsupported status change")),
    }
}
