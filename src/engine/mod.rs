mod error;
pub mod lifecycle;
mod mutations;
pub mod pricing;
mod queries;
pub mod validator;

pub use error::{EngineError, ValidationError};
pub use pricing::Price;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit WAL channel ─────────────────────────────

type AppendResponse = oneshot::Sender<io::Result<()>>;

pub(super) enum WalCommand {
    /// Events of one logical change; written and synced together.
    Append {
        events: Vec<Event>,
        response: AppendResponse,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Every append that is already queued when the first one is
/// picked up joins the same batch and shares one fsync.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (events, response) = match cmd {
            WalCommand::Append { events, response } => (events, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(events, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { events, response } => batch.push((events, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal<Event>, batch: Vec<(Vec<Event>, AppendResponse)>) {
    let events: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(events as f64);
    let started = Instant::now();

    let mut result = Ok(());
    'append: for (events, _) in &batch {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                result = Err(e);
                break 'append;
            }
        }
    }
    if result.is_ok() {
        result = wal.flush_sync();
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", events);
        // Cut the batch back out so it cannot strand later records.
        if let Err(e) = wal.rollback() {
            tracing::error!("WAL rollback failed: {e}");
        }
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed to control path")));
        }
    }
}

// ── In-memory state ──────────────────────────────────────

/// Case-insensitive key for the plate and category-name indexes.
pub(super) fn unique_key(s: &str) -> String {
    s.trim().to_uppercase()
}

pub struct Engine {
    pub(super) vehicles: DashMap<Ulid, SharedVehicleState>,
    pub(super) categories: DashMap<Ulid, Category>,
    /// Reverse lookup: reservation id → vehicle id.
    pub(super) reservation_to_vehicle: DashMap<Ulid, Ulid>,
    /// Normalized plate → vehicle id.
    pub(super) plates: DashMap<String, Ulid>,
    /// Normalized category name → category id.
    pub(super) category_names: DashMap<String, Ulid>,
    /// Serializes catalog edits so uniqueness and reference checks hold
    /// until the change is applied. Taken before any vehicle lock.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a per-vehicle event. The caller holds the vehicle's write lock.
/// Registration and deletion are handled at the map level.
fn apply_to_vehicle(vs: &mut VehicleState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::VehicleUpdated { vehicle } => vs.vehicle = vehicle.clone(),
        Event::VehicleStatusChanged { status, .. } => vs.vehicle.status = *status,
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.vehicle_id);
            vs.insert_reservation(reservation.clone());
        }
        Event::ReservationRescheduled {
            id,
            range,
            days,
            daily_rate,
            total_amount,
            notes,
            ..
        } => {
            // re-insert to keep the start-date order
            if let Some(mut r) = vs.remove_reservation(*id) {
                r.range = *range;
                r.days = *days;
                r.daily_rate = *daily_rate;
                r.total_amount = *total_amount;
                r.notes = notes.clone();
                vs.insert_reservation(r);
            }
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = vs.reservation_mut(*id) {
                r.status = *status;
            }
        }
        Event::VehicleRegistered { .. }
        | Event::VehicleDeleted { .. }
        | Event::CategoryCreated { .. }
        | Event::CategoryUpdated { .. }
        | Event::CategoryDeleted { .. } => {}
    }
}

impl Engine {
    /// Open the WAL at `wal_path`, rebuild state from it and start the
    /// writer task. Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::<Event>::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            vehicles: DashMap::new(),
            categories: DashMap::new(),
            reservation_to_vehicle: DashMap::new(),
            plates: DashMap::new(),
            category_names: DashMap::new(),
            catalog_lock: Mutex::new(()),
            wal_tx,
            notify,
        };

        // Rebuild into plain values first; nothing else can see them yet.
        let mut vehicles: HashMap<Ulid, VehicleState> = HashMap::new();
        for event in &events {
            match event {
                Event::CategoryCreated { category } | Event::CategoryUpdated { category } => {
                    engine.index_category(category);
                }
                Event::CategoryDeleted { id } => engine.unindex_category(id),
                Event::VehicleRegistered { vehicle } => {
                    engine.plates.insert(unique_key(&vehicle.license_plate), vehicle.id);
                    vehicles.insert(vehicle.id, VehicleState::new(vehicle.clone()));
                }
                Event::VehicleDeleted { id } => {
                    if let Some(vs) = vehicles.remove(id) {
                        engine.unindex_vehicle(&vs);
                    }
                }
                other => {
                    let Some(vehicle_id) = other.vehicle_id() else { continue };
                    if let Some(vs) = vehicles.get_mut(&vehicle_id) {
                        if let Event::VehicleUpdated { vehicle } = other {
                            engine.plates.remove(&unique_key(&vs.vehicle.license_plate));
                            engine.plates.insert(unique_key(&vehicle.license_plate), vehicle.id);
                        }
                        apply_to_vehicle(vs, other, &engine.reservation_to_vehicle);
                    }
                }
            }
        }
        for (id, vs) in vehicles {
            engine.vehicles.insert(id, Arc::new(RwLock::new(vs)));
        }

        tracing::info!(
            "replayed {} events from {}: {} categories, {} vehicles, {} reservations",
            events.len(),
            wal_path.display(),
            engine.categories.len(),
            engine.vehicles.len(),
            engine.reservation_to_vehicle.len()
        );
        Ok(engine)
    }

    fn index_category(&self, category: &Category) {
        if let Some(old) = self.categories.get(&category.id) {
            self.category_names.remove(&unique_key(&old.name));
        }
        self.category_names.insert(unique_key(&category.name), category.id);
        self.categories.insert(category.id, category.clone());
    }

    fn unindex_category(&self, id: &Ulid) {
        if let Some((_, old)) = self.categories.remove(id) {
            self.category_names.remove(&unique_key(&old.name));
        }
    }

    fn unindex_vehicle(&self, vs: &VehicleState) {
        self.plates.remove(&unique_key(&vs.vehicle.license_plate));
        for r in &vs.reservations {
            self.reservation_to_vehicle.remove(&r.id);
        }
    }

    /// Durably record the events of one change via the group-commit writer.
    async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_vehicle_state(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn vehicle_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_vehicle.get(reservation_id).map(|e| *e.value())
    }

    /// Snapshot of every vehicle handle, so no map guard is held across an await.
    pub(super) fn vehicle_handles(&self) -> Vec<SharedVehicleState> {
        self.vehicles.iter().map(|e| e.value().clone()).collect()
    }

    /// WAL append, then apply and notify, for events of one vehicle.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VehicleState,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        self.wal_append(events.clone()).await?;
        let vehicle_id = vs.vehicle.id;
        for event in &events {
            apply_to_vehicle(vs, event, &self.reservation_to_vehicle);
            self.notify.send(vehicle_id, event);
        }
        Ok(())
    }

    /// Write-lock a vehicle. Fails if it was deleted while we waited.
    pub(super) async fn lock_vehicle(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VehicleState>, EngineError> {
        let vs = self.get_vehicle_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = vs.write_owned().await;
        if !self.vehicles.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// Reservation id → owning vehicle, write-locked.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VehicleState>, EngineError> {
        let vehicle_id = self
            .vehicle_for_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let guard = self.lock_vehicle(vehicle_id).await?;
        if guard.reservation(reservation_id).is_none() {
            return Err(EngineError::NotFound(reservation_id));
        }
        Ok(guard)
    }
}
