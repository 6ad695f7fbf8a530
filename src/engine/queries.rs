use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::auth::{Actor, Capability};
use crate::model::*;

use super::pricing::{price, Price};
use super::validator::{check_range, validate, Candidate};
use super::{Engine, EngineError};

/// Number of vehicles in the dashboard's ranking.
const TOP_VEHICLES: usize = 5;
/// Window of the monthly revenue report.
const REVENUE_WINDOW_DAYS: i64 = 180;

fn matches_text(needle: &str, haystacks: &[&str]) -> bool {
    let needle = needle.to_lowercase();
    haystacks.iter().any(|h| h.to_lowercase().contains(&needle))
}

impl VehicleFilter {
    pub fn matches(&self, v: &Vehicle) -> bool {
        self.category_id.is_none_or(|c| c == v.category_id)
            && self.transmission.is_none_or(|t| t == v.transmission)
            && self.status.is_none_or(|s| s == v.status)
            && self
                .search
                .as_deref()
                .is_none_or(|q| matches_text(q, &[&v.brand, &v.model, &v.license_plate]))
    }
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation, vehicle: &Vehicle) -> bool {
        self.status.is_none_or(|s| s == r.status)
            && self.vehicle_id.is_none_or(|id| id == r.vehicle_id)
            && self.client.as_deref().is_none_or(|c| c == r.client)
            && self
                .search
                .as_deref()
                .is_none_or(|q| matches_text(q, &[&r.client, &vehicle.license_plate]))
            && self.start_from.is_none_or(|d| r.range.start >= d)
            && self.end_until.is_none_or(|d| r.range.end <= d)
    }
}

impl Engine {
    /// Clients only see vehicles that can currently be booked.
    pub async fn get_vehicle(&self, actor: &Actor, id: Ulid) -> Result<Vehicle, EngineError> {
        actor.authorize(Capability::BrowseCatalog)?;
        let vs = self.get_vehicle_state(&id).ok_or(EngineError::NotFound(id))?;
        let vehicle = vs.read().await.vehicle.clone();
        if !actor.role.is_staff() && vehicle.status != VehicleStatus::Available {
            return Err(EngineError::NotFound(id));
        }
        Ok(vehicle)
    }

    /// Catalog listing, sorted by brand, model and plate.
    pub async fn list_vehicles(
        &self,
        actor: &Actor,
        filter: &VehicleFilter,
    ) -> Result<Vec<Vehicle>, EngineError> {
        actor.authorize(Capability::BrowseCatalog)?;
        let mut filter = filter.clone();
        if !actor.role.is_staff() {
            if filter.status.is_some_and(|s| s != VehicleStatus::Available) {
                return Ok(Vec::new());
            }
            filter.status = Some(VehicleStatus::Available);
        }

        let mut out = Vec::new();
        for vs in self.vehicle_handles() {
            let guard = vs.read().await;
            if filter.matches(&guard.vehicle) {
                out.push(guard.vehicle.clone());
            }
        }
        out.sort_by(|a, b| {
            (&a.brand, &a.model, &a.license_plate).cmp(&(&b.brand, &b.model, &b.license_plate))
        });
        Ok(out)
    }

    pub fn list_categories(&self, actor: &Actor) -> Result<Vec<Category>, EngineError> {
        actor.authorize(Capability::BrowseCatalog)?;
        let mut out: Vec<Category> = self.categories.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    pub fn get_category(&self, actor: &Actor, id: Ulid) -> Result<Category, EngineError> {
        actor.authorize(Capability::BrowseCatalog)?;
        self.categories
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Newest first. Clients are limited to their own reservations whatever
    /// the filter says.
    pub async fn list_reservations(
        &self,
        actor: &Actor,
        filter: &ReservationFilter,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let mut filter = filter.clone();
        if actor.role.is_staff() {
            actor.authorize(Capability::ManageAllReservations)?;
        } else {
            actor.authorize(Capability::ManageOwnReservations)?;
            if filter.client.as_deref().is_some_and(|c| c != actor.user) {
                return Ok(Vec::new());
            }
            filter.client = Some(actor.user.clone());
        }

        let mut out = Vec::new();
        let handles = match filter.vehicle_id {
            Some(id) => self.get_vehicle_state(&id).into_iter().collect(),
            None => self.vehicle_handles(),
        };
        for vs in handles {
            let guard = vs.read().await;
            for r in &guard.reservations {
                if filter.matches(r, &guard.vehicle) {
                    out.push(ReservationInfo {
                        reservation: r.clone(),
                        vehicle: guard.vehicle.display_name(),
                    });
                }
            }
        }
        out.sort_by(|a, b| {
            (b.reservation.created_at, b.reservation.id)
                .cmp(&(a.reservation.created_at, a.reservation.id))
        });
        Ok(out)
    }

    pub async fn get_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
    ) -> Result<ReservationInfo, EngineError> {
        let vehicle_id = self
            .vehicle_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = vs.read().await;
        let reservation = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;
        actor.authorize_owner(&reservation.client)?;
        Ok(ReservationInfo {
            reservation,
            vehicle: guard.vehicle.display_name(),
        })
    }

    /// Run the booking checks and pricing without storing anything.
    /// `exclude` names a reservation being edited so it does not conflict
    /// with itself.
    pub async fn quote(
        &self,
        actor: &Actor,
        vehicle_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Price, EngineError> {
        actor.authorize(Capability::BrowseCatalog)?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let editing_here = exclude.is_some_and(|id| guard.reservation(id).is_some());
        if guard.vehicle.status == VehicleStatus::Maintenance && !editing_here {
            return Err(EngineError::VehicleUnavailable(vehicle_id));
        }
        let range = check_range(start, end)?;
        let mut candidate = Candidate::new(vehicle_id, start, end);
        if let Some(id) = exclude {
            candidate = candidate.editing(id);
        }
        validate(&candidate, guard.overlapping(&range))?;
        price(start, end, guard.vehicle.daily_rate)
    }

    /// Fleet and revenue summary. `now` anchors the monthly revenue window.
    pub async fn dashboard(
        &self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Dashboard, EngineError> {
        actor.authorize(Capability::ViewReports)?;
        let since = now - Duration::days(REVENUE_WINDOW_DAYS);

        let mut total_vehicles = 0;
        let mut available_vehicles = 0;
        let mut active_reservations = 0;
        let mut total_revenue = Decimal::ZERO;
        let mut by_status: BTreeMap<ReservationStatus, usize> = BTreeMap::new();
        let mut usage = Vec::new();
        let mut monthly: BTreeMap<String, Decimal> = BTreeMap::new();

        for vs in self.vehicle_handles() {
            let guard = vs.read().await;
            total_vehicles += 1;
            if guard.vehicle.status == VehicleStatus::Available {
                available_vehicles += 1;
            }
            usage.push(VehicleUsage {
                vehicle_id: guard.vehicle.id,
                vehicle: guard.vehicle.display_name(),
                reservations: guard.reservations.len(),
            });
            for r in &guard.reservations {
                *by_status.entry(r.status).or_default() += 1;
                match r.status {
                    ReservationStatus::Active => active_reservations += 1,
                    ReservationStatus::Completed => {
                        total_revenue += r.total_amount;
                        if r.created_at >= since {
                            let month = r.created_at.format("%Y-%m").to_string();
                            *monthly.entry(month).or_default() += r.total_amount;
                        }
                    }
                    _ => {}
                }
            }
        }

        usage.sort_by(|a, b| {
            b.reservations
                .cmp(&a.reservations)
                .then_with(|| a.vehicle.cmp(&b.vehicle))
        });
        usage.truncate(TOP_VEHICLES);

        Ok(Dashboard {
            total_vehicles,
            available_vehicles,
            active_reservations,
            total_revenue,
            status_distribution: by_status.into_iter().collect(),
            top_vehicles: usage,
            monthly_revenue: monthly
                .into_iter()
                .map(|(month, total)| MonthlyRevenue { month, total })
                .collect(),
        })
    }
}
