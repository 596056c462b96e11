mod allocator;
mod checker;
mod error;
mod ledger;
mod mutations;
mod policy;
mod queries;
mod slots;

pub use allocator::{cycle_complete, deficits, pick_next, RosterEntry};
pub use checker::check_availability;
pub use error::EngineError;
pub use slots::free_slots;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::calendar::OrgClock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSalesperson = Arc<RwLock<SalespersonState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            // Flush what we have before touching the file otherwise.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Scheduling engine for one organisation.
pub struct Engine {
    pub state: DashMap<Ulid, SharedSalesperson>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: rule/blackout/appointment id → salesperson id.
    pub(super) entity_to_salesperson: DashMap<Ulid, Ulid>,
    pub(super) utc_offset_minutes: AtomicI32,
    /// Next roster position handed to a newly created salesperson.
    pub(super) next_seq: AtomicU64,
    /// Serializes the post-increment cycle-reset scan.
    pub(super) cycle_lock: Mutex<()>,
    /// Shared by every mutation from its WAL append until the event is
    /// applied; compaction holds it exclusively until the rewrite lands.
    /// Taken before any salesperson lock, at most once per task.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply a per-salesperson event (no locking; caller holds the lock).
fn apply_to_salesperson(rs: &mut SalespersonState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SalespersonUpdated { name, contact, target_share, active, .. } => {
            rs.name = name.clone();
            rs.contact = contact.clone();
            rs.target_share = *target_share;
            rs.active = *active;
        }
        Event::RuleAdded { salesperson_id, rule } => {
            rs.rules.push(*rule);
            entity_map.insert(rule.id, *salesperson_id);
        }
        Event::RuleRemoved { id, .. } => {
            rs.remove_rule(*id);
            entity_map.remove(id);
        }
        Event::BlackoutAdded { id, salesperson_id, span, reason } => {
            rs.insert_blackout(Blackout {
                id: *id,
                span: *span,
                reason: reason.clone(),
            });
            entity_map.insert(*id, *salesperson_id);
        }
        Event::BlackoutRemoved { id, .. } => {
            rs.remove_blackout(*id);
            entity_map.remove(id);
        }
        Event::AppointmentBooked {
            id,
            salesperson_id,
            lead_id,
            scheduled_at,
            duration_minutes,
            notes,
        } => {
            rs.insert_appointment(Appointment {
                id: *id,
                salesperson_id: *salesperson_id,
                lead_id: lead_id.clone(),
                scheduled_at: *scheduled_at,
                duration_minutes: *duration_minutes,
                notes: notes.clone(),
                status: AppointmentStatus::Scheduled,
            });
            entity_map.insert(*id, *salesperson_id);
        }
        Event::AppointmentRescheduled { id, scheduled_at, .. } => {
            rs.move_appointment(*id, *scheduled_at);
        }
        Event::AppointmentCancelled { id, .. } => {
            rs.set_status(*id, AppointmentStatus::Cancelled);
        }
        Event::AppointmentCompleted { id, .. } => {
            rs.set_status(*id, AppointmentStatus::Completed);
        }
        Event::CounterSet { leads_received, .. } => {
            rs.leads_received = *leads_received;
        }
        Event::AssignmentRecorded { .. } => {
            rs.leads_received += 1;
        }
        Event::CycleReset { .. } => {
            rs.leads_received = 0;
        }
        // Handled at the engine level, not per salesperson
        Event::UtcOffsetSet { .. } | Event::SalespersonCreated { .. } | Event::SalespersonDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, default_utc_offset_minutes: i32) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_salesperson: DashMap::new(),
            utc_offset_minutes: AtomicI32::new(OrgClock::new(default_utc_offset_minutes).utc_offset_minutes()),
            next_seq: AtomicU64::new(0),
            cycle_lock: Mutex::new(()),
            compaction_gate: RwLock::new(()),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never block here: this may run inside an async context
        // (lazy tenant creation).
        for event in &events {
            match event {
                Event::UtcOffsetSet { minutes } => {
                    engine.utc_offset_minutes.store(*minutes, Ordering::Relaxed);
                }
                Event::SalespersonCreated { id, name, contact, target_share, active } => {
                    engine.insert_salesperson(*id, name.clone(), contact.clone(), *target_share, *active);
                }
                Event::SalespersonDeleted { id } => {
                    engine.drop_salesperson(id);
                }
                Event::CycleReset { salesperson_ids } => {
                    for sid in salesperson_ids {
                        if let Some(rs) = engine.get_salesperson(sid)
                            && let Ok(mut guard) = rs.try_write() {
                                apply_to_salesperson(&mut guard, event, &engine.entity_to_salesperson);
                            }
                    }
                }
                other => {
                    if let Some(sid) = event_salesperson_id(other)
                        && let Some(rs) = engine.get_salesperson(&sid)
                        && let Ok(mut guard) = rs.try_write() {
                            apply_to_salesperson(&mut guard, other, &engine.entity_to_salesperson);
                        }
                }
            }
        }

        tracing::debug!(
            "replayed {} events into {} salespeople from {}",
            events.len(),
            engine.state.len(),
            wal_path.display()
        );
        Ok(engine)
    }

    pub fn clock(&self) -> OrgClock {
        OrgClock::new(self.utc_offset_minutes.load(Ordering::Relaxed))
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_salesperson(&self, id: &Ulid) -> Option<SharedSalesperson> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_salesperson_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_salesperson.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn insert_salesperson(
        &self,
        id: Ulid,
        name: String,
        contact: Option<String>,
        target_share: f64,
        active: bool,
    ) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let rs = SalespersonState::new(id, seq, name, contact, target_share, active);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
    }

    /// Forget a salesperson and every entity id that pointed at it.
    pub(super) fn drop_salesperson(&self, id: &Ulid) {
        self.entity_to_salesperson.retain(|_, owner| owner != id);
        self.state.remove(id);
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        salesperson_id: Ulid,
        rs: &mut SalespersonState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_salesperson(rs, event, &self.entity_to_salesperson);
        self.notify.send(salesperson_id, event);
        Ok(())
    }

    /// Lookup entity → salesperson, acquire that salesperson's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SalespersonState>), EngineError> {
        let salesperson_id = self
            .get_salesperson_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_salesperson(&salesperson_id)
            .ok_or(EngineError::NotFound(salesperson_id))?;
        let guard = rs.write_owned().await;
        Ok((salesperson_id, guard))
    }

    /// Snapshot of every salesperson handle, so callers can await locks
    /// without holding a DashMap shard.
    pub(super) fn all_salespeople(&self) -> Vec<SharedSalesperson> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }
}

/// The salesperson an event belongs to (for per-salesperson events).
fn event_salesperson_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SalespersonUpdated { id, .. } => Some(*id),
        Event::RuleAdded { salesperson_id, .. }
        | Event::RuleRemoved { salesperson_id, .. }
        | Event::BlackoutAdded { salesperson_id, .. }
        | Event::BlackoutRemoved { salesperson_id, .. }
        | Event::AppointmentBooked { salesperson_id, .. }
        | Event::AppointmentRescheduled { salesperson_id, .. }
        | Event::AppointmentCancelled { salesperson_id, .. }
        | Event::AppointmentCompleted { salesperson_id, .. }
        | Event::CounterSet { salesperson_id, .. }
        | Event::AssignmentRecorded { salesperson_id } => Some(*salesperson_id),
        Event::UtcOffsetSet { .. }
        | Event::SalespersonCreated { .. }
        | Event::SalespersonDeleted { .. }
        | Event::CycleReset { .. } => None,
    }
}
