use dashmap::mapref::entry::Entry;
use tracing::warn;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::checker::check_availability;
use super::mutations::{check_len, validate_timestamp};
use super::{Engine, EngineError};

/// Slots and the uniqueness index both work on whole minutes.
fn validate_instant(t: Ms) -> Result<(), EngineError> {
    validate_timestamp(t)?;
    if t.rem_euclid(MINUTE_MS) != 0 {
        return Err(EngineError::InvalidInput(format!(
            "appointment time must fall on a whole minute, got {t}"
        )));
    }
    Ok(())
}

fn validate_booking(req: &BookingRequest) -> Result<(), EngineError> {
    validate_instant(req.scheduled_at)?;
    if req.duration_minutes == 0 {
        return Err(EngineError::InvalidInput("duration must be positive".into()));
    }
    if req.duration_minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("appointment duration too long"));
    }
    check_len(req.lead_id.as_deref(), MAX_LEAD_ID_LEN, "lead id too long")?;
    check_len(req.notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
    Ok(())
}

fn record_conflict(reason: &UnavailableReason) {
    let label = match reason {
        UnavailableReason::NoScheduleForDay => "no_schedule",
        UnavailableReason::OutsideBusinessHours => "outside_hours",
        UnavailableReason::BlockedByManager => "blackout",
        UnavailableReason::AlreadyBooked(_) => "already_booked",
    };
    metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL, "reason" => label).increment(1);
}

impl Engine {
    /// Book `req.scheduled_at` for `req.salesperson_id`.
    ///
    /// The availability check runs under a read lock; the uniqueness index
    /// is consulted again under the write lock, and a booking that loses
    /// that race fails with `StorageRace`. Exactly one of two concurrent
    /// bookings for the same instant succeeds, and the appointment id is
    /// claimed under the same lock.
    ///
    /// On success the lead is counted for the salesperson. The booking is
    /// already durable by then, so a failure to count it is logged and the
    /// appointment is still returned.
    pub async fn book(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        validate_booking(&req)?;
        let gate = self.compaction_gate.read().await;
        if self.entity_to_salesperson.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        let rs = self
            .get_salesperson(&req.salesperson_id)
            .ok_or(EngineError::NotFound(req.salesperson_id))?;

        let verdict = {
            let guard = rs.read().await;
            check_availability(&guard, req.scheduled_at, None, &self.clock())
        };
        if let Availability::Unavailable(reason) = verdict {
            record_conflict(&reason);
            return Err(EngineError::Conflict(reason));
        }

        let appt = {
            let mut guard = rs.write().await;
            if guard.appointments.len() >= MAX_APPOINTMENTS_PER_SALESPERSON {
                return Err(EngineError::LimitExceeded("too many appointments on salesperson"));
            }
            if let Some(existing) = guard.booked_at(req.scheduled_at) {
                warn!(
                    "booking {} lost the race for {} at {} to {existing}",
                    req.id, req.salesperson_id, req.scheduled_at
                );
                metrics::counter!(crate::observability::STORAGE_RACES_TOTAL).increment(1);
                return Err(EngineError::StorageRace { existing });
            }
            match self.entity_to_salesperson.entry(req.id) {
                Entry::Occupied(_) => return Err(EngineError::AlreadyExists(req.id)),
                Entry::Vacant(slot) => {
                    slot.insert(req.salesperson_id);
                }
            }

            let event = Event::AppointmentBooked {
                id: req.id,
                salesperson_id: req.salesperson_id,
                lead_id: req.lead_id.clone(),
                scheduled_at: req.scheduled_at,
                duration_minutes: req.duration_minutes,
                notes: req.notes.clone(),
            };
            if let Err(e) = self.persist_and_apply(req.salesperson_id, &mut guard, &event).await {
                self.entity_to_salesperson.remove(&req.id);
                return Err(e);
            }
            Appointment {
                id: req.id,
                salesperson_id: req.salesperson_id,
                lead_id: req.lead_id,
                scheduled_at: req.scheduled_at,
                duration_minutes: req.duration_minutes,
                notes: req.notes,
                status: AppointmentStatus::Scheduled,
            }
        };

        drop(gate);

        if let Err(e) = self.record_assignment(appt.salesperson_id).await {
            warn!(
                "booking {} committed but its lead was not counted for {}: {e}",
                appt.id, appt.salesperson_id
            );
        }
        Ok(appt)
    }

    /// Soft-cancel: the row stays for audit, the instant becomes bookable
    /// again. Cancelling twice is a no-op. The fairness counter is not
    /// decremented.
    pub async fn cancel(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (salesperson_id, mut guard) = self.resolve_entity_write(&id).await?;
        let status = guard
            .appointment(id)
            .map(|a| a.status)
            .ok_or(EngineError::NotFound(id))?;
        match status {
            AppointmentStatus::Cancelled => Ok(salesperson_id),
            AppointmentStatus::Completed => Err(EngineError::InvalidInput(
                "a completed appointment cannot be cancelled".into(),
            )),
            AppointmentStatus::Scheduled => {
                let event = Event::AppointmentCancelled { id, salesperson_id };
                self.persist_and_apply(salesperson_id, &mut guard, &event).await?;
                Ok(salesperson_id)
            }
        }
    }

    /// Move a scheduled appointment to `new_at` on the same salesperson.
    /// The appointment's own current instant never counts against it.
    pub async fn reschedule(&self, id: Ulid, new_at: Ms) -> Result<Appointment, EngineError> {
        validate_instant(new_at)?;
        let _gate = self.compaction_gate.read().await;
        let salesperson_id = self
            .get_salesperson_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_salesperson(&salesperson_id)
            .ok_or(EngineError::NotFound(salesperson_id))?;

        {
            let guard = rs.read().await;
            let appt = guard.appointment(id).ok_or(EngineError::NotFound(id))?;
            require_scheduled(appt)?;
            if appt.scheduled_at == new_at {
                return Ok(appt.clone());
            }
            if let Availability::Unavailable(reason) =
                check_availability(&guard, new_at, Some(id), &self.clock())
            {
                record_conflict(&reason);
                return Err(EngineError::Conflict(reason));
            }
        }

        let mut guard = rs.write().await;
        let appt = guard.appointment(id).ok_or(EngineError::NotFound(id))?;
        require_scheduled(appt)?;
        if let Some(existing) = guard.booked_at(new_at)
            && existing != id {
                warn!("reschedule of {id} lost the race for {new_at} to {existing}");
                metrics::counter!(crate::observability::STORAGE_RACES_TOTAL).increment(1);
                return Err(EngineError::StorageRace { existing });
            }

        let event = Event::AppointmentRescheduled {
            id,
            salesperson_id,
            scheduled_at: new_at,
        };
        self.persist_and_apply(salesperson_id, &mut guard, &event).await?;
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Mark a scheduled appointment as held. Completing twice is a no-op.
    pub async fn complete(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (salesperson_id, mut guard) = self.resolve_entity_write(&id).await?;
        let status = guard
            .appointment(id)
            .map(|a| a.status)
            .ok_or(EngineError::NotFound(id))?;
        match status {
            AppointmentStatus::Completed => Ok(salesperson_id),
            AppointmentStatus::Cancelled => Err(EngineError::InvalidInput(
                "a cancelled appointment cannot be completed".into(),
            )),
            AppointmentStatus::Scheduled => {
                let event = Event::AppointmentCompleted { id, salesperson_id };
                self.persist_and_apply(salesperson_id, &mut guard, &event).await?;
                Ok(salesperson_id)
            }
        }
    }
}

fn require_scheduled(appt: &Appointment) -> Result<(), EngineError> {
    if appt.status != AppointmentStatus::Scheduled {
        return Err(EngineError::InvalidInput(format!(
            "only scheduled appointments can be rescheduled; this one is {}",
            appt.status.as_str()
        )));
    }
    Ok(())
}
