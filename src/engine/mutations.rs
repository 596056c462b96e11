use std::sync::atomic::Ordering;

use tokio::sync::{oneshot, OwnedRwLockWriteGuard};
use tracing::info;
use ulid::Ulid;

use crate::calendar::{now_ms, MAX_OFFSET_MINUTES, MINUTES_PER_DAY};
use crate::limits::*;
use crate::model::*;

use super::allocator::{cycle_complete, RosterEntry};
use super::{apply_to_salesperson, Engine, EngineError, WalCommand};

// ── Input validation ─────────────────────────────────────────────

pub(super) fn validate_timestamp(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(super) fn check_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    if let Some(v) = value
        && v.len() > max {
            return Err(EngineError::LimitExceeded(what));
        }
    Ok(())
}

fn validate_share(target_share: f64) -> Result<(), EngineError> {
    if !target_share.is_finite() || target_share < 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "target share must be a non-negative number, got {target_share}"
        )));
    }
    if target_share > MAX_TARGET_SHARE {
        return Err(EngineError::LimitExceeded("target share too large"));
    }
    Ok(())
}

fn validate_rule(rule: &WeeklyRule) -> Result<(), EngineError> {
    if rule.weekday > 6 {
        return Err(EngineError::InvalidInput(format!(
            "weekday must be 0..=6, got {}",
            rule.weekday
        )));
    }
    if rule.end_minute > MINUTES_PER_DAY || rule.start_minute >= rule.end_minute {
        return Err(EngineError::InvalidInput(
            "rule start must be before end, within one day".into(),
        ));
    }
    if rule.granularity_minutes == 0 {
        return Err(EngineError::InvalidInput("granularity must be positive".into()));
    }
    Ok(())
}

impl Engine {
    // ── Salespeople ──────────────────────────────────────────────

    pub async fn create_salesperson(
        &self,
        id: Ulid,
        name: String,
        contact: Option<String>,
        target_share: f64,
        active: bool,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_SALESPEOPLE_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many salespeople"));
        }
        check_len(Some(&name), MAX_NAME_LEN, "salesperson name too long")?;
        check_len(contact.as_deref(), MAX_CONTACT_LEN, "contact too long")?;
        validate_share(target_share)?;
        let _gate = self.compaction_gate.read().await;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::SalespersonCreated {
            id,
            name: name.clone(),
            contact: contact.clone(),
            target_share,
            active,
        };
        self.wal_append(&event).await?;
        self.insert_salesperson(id, name, contact, target_share, active);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_salesperson(&self, id: Ulid, patch: SalespersonPatch) -> Result<SalespersonInfo, EngineError> {
        check_len(patch.name.as_deref(), MAX_NAME_LEN, "salesperson name too long")?;
        if let Some(Some(ref c)) = patch.contact {
            check_len(Some(c), MAX_CONTACT_LEN, "contact too long")?;
        }
        if let Some(share) = patch.target_share {
            validate_share(share)?;
        }
        let _gate = self.compaction_gate.read().await;
        let rs = self.get_salesperson(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::SalespersonUpdated {
            id,
            name: patch.name.unwrap_or_else(|| guard.name.clone()),
            contact: patch.contact.unwrap_or_else(|| guard.contact.clone()),
            target_share: patch.target_share.unwrap_or(guard.target_share),
            active: patch.active.unwrap_or(guard.active),
        };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Refuses while the salesperson still has scheduled appointments at or
    /// after now; the caller must cancel or reassign those first.
    pub async fn delete_salesperson(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let rs = self.get_salesperson(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if guard.has_scheduled_from(now_ms()) {
            return Err(EngineError::HasFutureAppointments(id));
        }

        let event = Event::SalespersonDeleted { id };
        self.wal_append(&event).await?;
        self.drop_salesperson(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        drop(guard);
        Ok(())
    }

    // ── Weekly rules ─────────────────────────────────────────────

    pub async fn add_rule(&self, salesperson_id: Ulid, rule: WeeklyRule) -> Result<(), EngineError> {
        validate_rule(&rule)?;
        let _gate = self.compaction_gate.read().await;
        if self.entity_to_salesperson.contains_key(&rule.id) {
            return Err(EngineError::AlreadyExists(rule.id));
        }
        let rs = self
            .get_salesperson(&salesperson_id)
            .ok_or(EngineError::NotFound(salesperson_id))?;
        let mut guard = rs.write().await;
        if guard.rules.len() >= MAX_RULES_PER_SALESPERSON {
            return Err(EngineError::LimitExceeded("too many weekly rules on salesperson"));
        }

        let event = Event::RuleAdded { salesperson_id, rule };
        self.persist_and_apply(salesperson_id, &mut guard, &event).await
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (salesperson_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::RuleRemoved { id, salesperson_id };
        self.persist_and_apply(salesperson_id, &mut guard, &event).await?;
        Ok(salesperson_id)
    }

    // ── Blackouts ────────────────────────────────────────────────

    pub async fn add_blackout(
        &self,
        id: Ulid,
        salesperson_id: Ulid,
        span: Span,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        validate_timestamp(span.start)?;
        validate_timestamp(span.end)?;
        if span.start >= span.end {
            return Err(EngineError::InvalidInput("blackout start must be before end".into()));
        }
        check_len(reason.as_deref(), MAX_REASON_LEN, "blackout reason too long")?;
        let _gate = self.compaction_gate.read().await;
        if self.entity_to_salesperson.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_salesperson(&salesperson_id)
            .ok_or(EngineError::NotFound(salesperson_id))?;
        let mut guard = rs.write().await;
        if guard.blackouts.len() >= MAX_BLACKOUTS_PER_SALESPERSON {
            return Err(EngineError::LimitExceeded("too many blackouts on salesperson"));
        }

        let event = Event::BlackoutAdded { id, salesperson_id, span, reason };
        self.persist_and_apply(salesperson_id, &mut guard, &event).await
    }

    pub async fn remove_blackout(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (salesperson_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.blackouts.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BlackoutRemoved { id, salesperson_id };
        self.persist_and_apply(salesperson_id, &mut guard, &event).await?;
        Ok(salesperson_id)
    }

    // ── Organisation settings ────────────────────────────────────

    pub async fn set_utc_offset(&self, minutes: i32) -> Result<(), EngineError> {
        if minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(EngineError::InvalidInput(format!(
                "utc offset must be within ±{MAX_OFFSET_MINUTES} minutes, got {minutes}"
            )));
        }
        let event = Event::UtcOffsetSet { minutes };
        let _gate = self.compaction_gate.read().await;
        self.wal_append(&event).await?;
        self.utc_offset_minutes.store(minutes, Ordering::Relaxed);
        Ok(())
    }

    // ── Fairness counters ────────────────────────────────────────

    /// Count one lead for `salesperson_id`, then reset every active counter
    /// if the cycle is now complete.
    pub async fn record_assignment(&self, salesperson_id: Ulid) -> Result<(), EngineError> {
        {
            let _gate = self.compaction_gate.read().await;
            let rs = self
                .get_salesperson(&salesperson_id)
                .ok_or(EngineError::NotFound(salesperson_id))?;
            let mut guard = rs.write().await;
            let event = Event::AssignmentRecorded { salesperson_id };
            self.persist_and_apply(salesperson_id, &mut guard, &event).await?;
        }
        self.reset_cycle_if_complete().await?;
        Ok(())
    }

    /// Returns true when a reset happened.
    pub(super) async fn reset_cycle_if_complete(&self) -> Result<bool, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let _cycle = self.cycle_lock.lock().await;

        let roster = self.active_roster().await;
        if !cycle_complete(&roster) {
            return Ok(false);
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut salesperson_ids: Vec<Ulid> = roster.iter().map(|e| e.id).collect();
        salesperson_ids.sort();
        let mut guards = Vec::with_capacity(salesperson_ids.len());
        for sid in &salesperson_ids {
            if let Some(rs) = self.get_salesperson(sid) {
                guards.push(rs.write_owned().await);
            }
        }

        // Counters may have moved between the scan and the write locks.
        let roster = guarded_roster(&guards);
        if roster.len() != salesperson_ids.len() || !cycle_complete(&roster) {
            return Ok(false);
        }

        let event = Event::CycleReset {
            salesperson_ids: salesperson_ids.clone(),
        };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            apply_to_salesperson(guard, &event, &self.entity_to_salesperson);
            self.notify.send(guard.id, &event);
        }

        let total: u64 = roster.iter().map(|e| e.leads_received).sum();
        metrics::counter!(crate::observability::CYCLE_RESETS_TOTAL).increment(1);
        info!("fairness cycle complete after {total} leads; reset {} counters", salesperson_ids.len());
        Ok(true)
    }

    /// Active salespeople in roster order.
    pub(super) async fn active_roster(&self) -> Vec<RosterEntry> {
        let mut roster = Vec::new();
        for rs in self.all_salespeople() {
            let guard = rs.read().await;
            if guard.active {
                roster.push((
                    guard.seq,
                    RosterEntry {
                        id: guard.id,
                        target_share: guard.target_share,
                        leads_received: guard.leads_received,
                    },
                ));
            }
        }
        roster.sort_by_key(|(seq, _)| *seq);
        roster.into_iter().map(|(_, e)| e).collect()
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Scheduled appointments whose end has passed.
    pub fn collect_finished_appointments(&self, now: Ms) -> Vec<Ulid> {
        let mut finished = Vec::new();
        for rs in self.all_salespeople() {
            if let Ok(guard) = rs.try_read() {
                for appt in &guard.appointments {
                    if appt.status == AppointmentStatus::Scheduled && appt.end() <= now {
                        finished.push(appt.id);
                    }
                }
            }
        }
        finished
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    /// No mutation can append between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut events = vec![Event::UtcOffsetSet {
            minutes: self.utc_offset_minutes.load(Ordering::Relaxed),
        }];

        let mut snapshots = Vec::new();
        for rs in self.all_salespeople() {
            snapshots.push(rs.read().await.clone());
        }
        // Replay assigns roster positions in creation order.
        snapshots.sort_by_key(|s| s.seq);

        for s in &snapshots {
            events.push(Event::SalespersonCreated {
                id: s.id,
                name: s.name.clone(),
                contact: s.contact.clone(),
                target_share: s.target_share,
                active: s.active,
            });
            if s.leads_received > 0 {
                events.push(Event::CounterSet {
                    salesperson_id: s.id,
                    leads_received: s.leads_received,
                });
            }
            for rule in &s.rules {
                events.push(Event::RuleAdded {
                    salesperson_id: s.id,
                    rule: *rule,
                });
            }
            for b in &s.blackouts {
                events.push(Event::BlackoutAdded {
                    id: b.id,
                    salesperson_id: s.id,
                    span: b.span,
                    reason: b.reason.clone(),
                });
            }
            // Cancelled rows first: a live booking may reuse their instant,
            // and replaying the cancel afterwards must not evict it.
            let (cancelled, live): (Vec<&Appointment>, Vec<&Appointment>) = s
                .appointments
                .iter()
                .partition(|a| a.status == AppointmentStatus::Cancelled);
            for appt in cancelled.into_iter().chain(live) {
                events.push(Event::AppointmentBooked {
                    id: appt.id,
                    salesperson_id: s.id,
                    lead_id: appt.lead_id.clone(),
                    scheduled_at: appt.scheduled_at,
                    duration_minutes: appt.duration_minutes,
                    notes: appt.notes.clone(),
                });
                match appt.status {
                    AppointmentStatus::Scheduled => {}
                    AppointmentStatus::Cancelled => events.push(Event::AppointmentCancelled {
                        id: appt.id,
                        salesperson_id: s.id,
                    }),
                    AppointmentStatus::Completed => events.push(Event::AppointmentCompleted {
                        id: appt.id,
                        salesperson_id: s.id,
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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

/// Active entries among already-locked salespeople, in roster order.
fn guarded_roster(guards: &[OwnedRwLockWriteGuard<SalespersonState>]) -> Vec<RosterEntry> {
    let mut active: Vec<&SalespersonState> = guards.iter().map(|g| &**g).filter(|s| s.active).collect();
    active.sort_by_key(|s| s.seq);
    active
        .into_iter()
        .map(|s| RosterEntry {
            id: s.id,
            target_share: s.target_share,
            leads_received: s.leads_received,
        })
        .collect()
}
