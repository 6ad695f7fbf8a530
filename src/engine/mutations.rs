use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::auth::{Actor, Capability};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::lifecycle::{self, VehicleEffect};
use super::pricing::{check_rate, price};
use super::validator::{check_range, validate, Candidate};
use super::{unique_key, Engine, EngineError, ValidationError, WalCommand};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.chars().count() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_category(category: &Category) -> Result<(), EngineError> {
    if category.name.is_empty() {
        return Err(EngineError::InvalidInput("category name is required"));
    }
    check_len(&category.name, MAX_NAME_LEN, "category name too long")?;
    check_len(&category.description, MAX_DESCRIPTION_LEN, "description too long")
}

fn check_vehicle(vehicle: &Vehicle) -> Result<(), EngineError> {
    if vehicle.license_plate.is_empty() {
        return Err(EngineError::InvalidVehicle("license plate is required"));
    }
    check_len(&vehicle.license_plate, MAX_PLATE_LEN, "license plate too long")?;
    if vehicle.brand.trim().is_empty() || vehicle.model.trim().is_empty() {
        return Err(EngineError::InvalidVehicle("brand and model are required"));
    }
    check_len(&vehicle.brand, MAX_NAME_LEN, "brand too long")?;
    check_len(&vehicle.model, MAX_NAME_LEN, "model too long")?;
    check_len(&vehicle.description, MAX_DESCRIPTION_LEN, "description too long")?;
    let max_year = Utc::now().year() + 1;
    if vehicle.year < MIN_VEHICLE_YEAR || vehicle.year > max_year {
        return Err(EngineError::InvalidVehicle("year out of range"));
    }
    if vehicle.capacity == 0 || vehicle.capacity > MAX_VEHICLE_CAPACITY {
        return Err(EngineError::InvalidVehicle("capacity out of range"));
    }
    check_rate(vehicle.daily_rate)?;
    Ok(())
}

/// Count and log a refused booking before handing the error back.
fn rejected(vehicle_id: Ulid, err: ValidationError) -> EngineError {
    let reason = match err {
        ValidationError::InvalidRange { .. } => "invalid_range",
        ValidationError::DateConflict { .. } => "date_conflict",
        ValidationError::InvalidRate(_) => "invalid_rate",
    };
    metrics::counter!(observability::RESERVATIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
    debug!("booking on {vehicle_id} refused: {err}");
    EngineError::Validation(err)
}

impl Engine {
    // ── Categories ───────────────────────────────────────────

    pub async fn create_category(
        &self,
        actor: &Actor,
        id: Ulid,
        name: &str,
        description: &str,
    ) -> Result<Category, EngineError> {
        actor.authorize(Capability::ManageFleet)?;
        let category = Category {
            id,
            name: name.trim().to_string(),
            description: description.to_string(),
        };
        check_category(&category)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.categories.len() >= MAX_CATEGORIES {
            return Err(EngineError::LimitExceeded("too many categories"));
        }
        if self.categories.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.category_names.contains_key(&unique_key(&category.name)) {
            return Err(EngineError::DuplicateCategory(category.name));
        }

        self.wal_append(vec![Event::CategoryCreated {
            category: category.clone(),
        }])
        .await?;
        self.index_category(&category);
        info!("category {id} created: {}", category.name);
        Ok(category)
    }

    pub async fn update_category(
        &self,
        actor: &Actor,
        id: Ulid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Category, EngineError> {
        actor.authorize(Capability::ManageFleet)?;
        let _catalog = self.catalog_lock.lock().await;
        let current = self
            .categories
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(EngineError::NotFound(id))?;

        let mut updated = current.clone();
        if let Some(name) = name {
            updated.name = name.trim().to_string();
        }
        if let Some(description) = description {
            updated.description = description.to_string();
        }
        check_category(&updated)?;
        if updated == current {
            return Ok(updated);
        }
        if let Some(owner) = self.category_names.get(&unique_key(&updated.name))
            && *owner != id
        {
            return Err(EngineError::DuplicateCategory(updated.name));
        }

        self.wal_append(vec![Event::CategoryUpdated {
            category: updated.clone(),
        }])
        .await?;
        self.index_category(&updated);
        info!("category {id} updated");
        Ok(updated)
    }

    pub async fn delete_category(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        actor.authorize(Capability::ManageFleet)?;
        let _catalog = self.catalog_lock.lock().await;
        if !self.categories.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        // category_id only changes under the catalog lock, which we hold
        for vs in self.vehicle_handles() {
            if vs.read().await.vehicle.category_id == id {
                return Err(EngineError::InUse(id));
            }
        }

        self.wal_append(vec![Event::CategoryDeleted { id }]).await?;
        self.unindex_category(&id);
        info!("category {id} deleted");
        Ok(())
    }

    // ── Vehicles ─────────────────────────────────────────────

    pub async fn register_vehicle(
        &self,
        actor: &Actor,
        new: NewVehicle,
    ) -> Result<Vehicle, EngineError> {
        actor.authorize(Capability::ManageFleet)?;
        let vehicle = Vehicle {
            id: new.id,
            license_plate: new.license_plate.trim().to_string(),
            brand: new.brand.trim().to_string(),
            model: new.model.trim().to_string(),
            year: new.year,
            category_id: new.category_id,
            transmission: new.transmission,
            daily_rate: new.daily_rate,
            capacity: new.capacity,
            description: new.description,
            status: VehicleStatus::Available,
            created_at: Utc::now(),
        };
        check_vehicle(&vehicle)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.vehicles.len() >= MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        if self.vehicles.contains_key(&vehicle.id) {
            return Err(EngineError::AlreadyExists(vehicle.id));
        }
        if !self.categories.contains_key(&vehicle.category_id) {
            return Err(EngineError::NotFound(vehicle.category_id));
        }
        if self.plates.contains_key(&unique_key(&vehicle.license_plate)) {
            return Err(EngineError::DuplicatePlate(vehicle.license_plate));
        }

        let event = Event::VehicleRegistered {
            vehicle: vehicle.clone(),
        };
        self.wal_append(vec![event.clone()]).await?;
        self.plates
            .insert(unique_key(&vehicle.license_plate), vehicle.id);
        self.vehicles.insert(
            vehicle.id,
            Arc::new(RwLock::new(VehicleState::new(vehicle.clone()))),
        );
        self.notify.send(vehicle.id, &event);
        info!("vehicle {} registered: {}", vehicle.id, vehicle.display_name());
        Ok(vehicle)
    }

    /// Edit catalog fields and, through `changes.status`, toggle maintenance.
    /// Existing reservations keep the rate they were priced with.
    pub async fn update_vehicle(
        &self,
        actor: &Actor,
        id: Ulid,
        changes: VehicleChanges,
    ) -> Result<Vehicle, EngineError> {
        actor.authorize(Capability::ManageFleet)?;
        let _catalog = self.catalog_lock.lock().await;
        let mut guard = self.lock_vehicle(id).await?;
        let current = guard.vehicle.clone();

        let mut updated = current.clone();
        if let Some(plate) = changes.license_plate {
            updated.license_plate = plate.trim().to_string();
        }
        if let Some(brand) = changes.brand {
            updated.brand = brand.trim().to_string();
        }
        if let Some(model) = changes.model {
            updated.model = model.trim().to_string();
        }
        if let Some(year) = changes.year {
            updated.year = year;
        }
        if let Some(category_id) = changes.category_id {
            updated.category_id = category_id;
        }
        if let Some(transmission) = changes.transmission {
            updated.transmission = transmission;
        }
        if let Some(rate) = changes.daily_rate {
            updated.daily_rate = rate;
        }
        if let Some(capacity) = changes.capacity {
            updated.capacity = capacity;
        }
        if let Some(description) = changes.description {
            updated.description = description;
        }
        if let Some(to) = changes.status
            && let Some(status) = lifecycle::check_manual_status(&current, to)?
        {
            updated.status = status;
        }
        check_vehicle(&updated)?;

        if updated == current {
            return Ok(updated);
        }
        if updated.category_id != current.category_id
            && !self.categories.contains_key(&updated.category_id)
        {
            return Err(EngineError::NotFound(updated.category_id));
        }
        let old_key = unique_key(&current.license_plate);
        let new_key = unique_key(&updated.license_plate);
        if new_key != old_key && self.plates.contains_key(&new_key) {
            return Err(EngineError::DuplicatePlate(updated.license_plate));
        }

        let event = Event::VehicleUpdated {
            vehicle: updated.clone(),
        };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        if new_key != old_key {
            self.plates.remove(&old_key);
            self.plates.insert(new_key, id);
        }
        if updated.status != current.status {
            info!("vehicle {id} status {} -> {}", current.status, updated.status);
        }
        Ok(updated)
    }

    /// Vehicles with any reservation history cannot be removed.
    pub async fn delete_vehicle(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        actor.authorize(Capability::ManageFleet)?;
        let _catalog = self.catalog_lock.lock().await;
        let guard = self.lock_vehicle(id).await?;
        if !guard.reservations.is_empty() {
            return Err(EngineError::InUse(id));
        }

        let event = Event::VehicleDeleted { id };
        self.wal_append(vec![event.clone()]).await?;
        self.vehicles.remove(&id);
        self.unindex_vehicle(&guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        info!("vehicle {id} deleted");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Validate, price and store a new pending reservation. The vehicle's
    /// write lock is held from the overlap check until the reservation is
    /// applied, so concurrent bookings of one vehicle are serialized.
    pub async fn create_reservation(
        &self,
        actor: &Actor,
        new: NewReservation,
    ) -> Result<Reservation, EngineError> {
        actor.authorize(Capability::Book)?;
        let client = match new.client.map(|c| c.trim().to_string()) {
            Some(c) if c.is_empty() => return Err(EngineError::InvalidInput("client is required")),
            Some(c) if c != actor.user => {
                actor.authorize(Capability::ManageAllReservations)?;
                c
            }
            _ => actor.user.clone(),
        };
        check_len(&client, MAX_CLIENT_LEN, "client name too long")?;
        check_len(&new.notes, MAX_NOTES_LEN, "notes too long")?;

        let mut guard = self.lock_vehicle(new.vehicle_id).await?;
        if guard.vehicle.status == VehicleStatus::Maintenance {
            return Err(EngineError::VehicleUnavailable(new.vehicle_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many reservations on vehicle"));
        }

        let range = check_range(new.start, new.end).map_err(|e| rejected(new.vehicle_id, e))?;
        let candidate = Candidate::new(new.vehicle_id, new.start, new.end);
        validate(&candidate, guard.overlapping(&range)).map_err(|e| rejected(new.vehicle_id, e))?;
        let quote = price(new.start, new.end, guard.vehicle.daily_rate)?;

        let reservation = Reservation {
            id: new.id,
            vehicle_id: new.vehicle_id,
            client,
            range,
            days: quote.days,
            daily_rate: quote.daily_rate,
            total_amount: quote.total,
            status: ReservationStatus::Pending,
            notes: new.notes,
            created_at: Utc::now(),
        };
        let mut events = vec![Event::ReservationCreated {
            reservation: reservation.clone(),
        }];
        if let Some(status) = lifecycle::on_reserved(guard.vehicle.status) {
            events.push(Event::VehicleStatusChanged {
                id: new.vehicle_id,
                status,
            });
        }

        // Claim the id across all vehicles before the WAL await; another
        // booking with the same id may hold a different vehicle's lock.
        match self.reservation_to_vehicle.entry(new.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(new.id)),
            Entry::Vacant(slot) => {
                slot.insert(new.vehicle_id);
            }
        }
        if let Err(e) = self.persist_and_apply(&mut guard, events).await {
            self.reservation_to_vehicle.remove(&new.id);
            return Err(e);
        }

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} on {} for {}: {} ({} days, {})",
            reservation.id,
            guard.vehicle.license_plate,
            reservation.client,
            reservation.range,
            reservation.days,
            reservation.total_amount
        );
        Ok(reservation)
    }

    /// Move a pending reservation to new dates. The rate is re-read from
    /// the vehicle and the total recomputed.
    pub async fn reschedule_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        notes: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(id).await?;
        let current = guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        actor.authorize_owner(&current.client)?;
        if current.status != ReservationStatus::Pending {
            return Err(EngineError::NotEditable(current.status));
        }
        let notes = notes.unwrap_or(current.notes);
        check_len(&notes, MAX_NOTES_LEN, "notes too long")?;

        let vehicle_id = current.vehicle_id;
        let range = check_range(start, end).map_err(|e| rejected(vehicle_id, e))?;
        let candidate = Candidate::new(vehicle_id, start, end).editing(id);
        validate(&candidate, guard.overlapping(&range)).map_err(|e| rejected(vehicle_id, e))?;
        let quote = price(start, end, guard.vehicle.daily_rate)?;

        let event = Event::ReservationRescheduled {
            id,
            vehicle_id,
            range,
            days: quote.days,
            daily_rate: quote.daily_rate,
            total_amount: quote.total,
            notes,
        };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        info!("reservation {id} moved from {} to {range}", current.range);
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Staff may make any allowed transition. Clients may only cancel their
    /// own reservations. A terminal status releases the vehicle.
    pub async fn transition_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        to: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(id).await?;
        let current = guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        actor.authorize_owner(&current.client)?;
        if to != ReservationStatus::Cancelled {
            actor.authorize(Capability::ManageAllReservations)?;
        }

        let effect = lifecycle::check_transition(current.status, to)?;
        let vehicle_id = current.vehicle_id;
        let mut events = vec![Event::ReservationStatusChanged {
            id,
            vehicle_id,
            status: to,
        }];
        if effect == VehicleEffect::Release
            && let Some(status) = lifecycle::on_released(guard.vehicle.status)
        {
            events.push(Event::VehicleStatusChanged {
                id: vehicle_id,
                status,
            });
        }
        let releases = events.len() > 1;
        self.persist_and_apply(&mut guard, events).await?;

        info!("reservation {id} {} -> {to}", current.status);
        if releases {
            info!("vehicle {} released", guard.vehicle.license_plate);
        }
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event list for the current state.
    /// The catalog lock and a read lock on every vehicle are held until the
    /// new file is in place, so no change can slip between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut categories: Vec<Category> =
            self.categories.iter().map(|e| e.value().clone()).collect();
        categories.sort_by_key(|c| c.id);
        let mut events: Vec<Event> = categories
            .into_iter()
            .map(|category| Event::CategoryCreated { category })
            .collect();

        let mut guards = Vec::new();
        for vs in self.vehicle_handles() {
            guards.push(vs.read_owned().await);
        }
        guards.sort_by_key(|g| g.vehicle.id);
        for vs in &guards {
            events.push(Event::VehicleRegistered {
                vehicle: vs.vehicle.clone(),
            });
            events.extend(vs.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
