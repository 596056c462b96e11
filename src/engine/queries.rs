use std::sync::atomic::Ordering;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::{format_time_of_day, now_ms};
use crate::model::*;

use super::{allocator, checker, slots, Engine, EngineError};

impl Engine {
    /// Free `HH:MM` slot starts for `salesperson_id` on local `date`.
    /// An unknown salesperson simply has no slots.
    pub async fn free_slots(&self, salesperson_id: Ulid, date: NaiveDate) -> Result<Vec<String>, EngineError> {
        self.free_slots_as_of(salesperson_id, date, now_ms()).await
    }

    pub async fn free_slots_as_of(
        &self,
        salesperson_id: Ulid,
        date: NaiveDate,
        now: Ms,
    ) -> Result<Vec<String>, EngineError> {
        let rs = match self.get_salesperson(&salesperson_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(slots::free_slots(&guard, date, &self.clock(), now)
            .into_iter()
            .map(format_time_of_day)
            .collect())
    }

    pub async fn check_availability(
        &self,
        salesperson_id: Ulid,
        at: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        let rs = self
            .get_salesperson(&salesperson_id)
            .ok_or(EngineError::NotFound(salesperson_id))?;
        let guard = rs.read().await;
        Ok(checker::check_availability(&guard, at, exclude, &self.clock()))
    }

    /// The active salesperson furthest below their target share. Pure:
    /// nothing is recorded until a booking succeeds.
    pub async fn pick_next(&self) -> Option<SalespersonInfo> {
        let roster = self.active_roster().await;
        let id = allocator::pick_next(&roster)?;
        self.get_salesperson_info(id).await
    }

    pub async fn get_salesperson_info(&self, id: Ulid) -> Option<SalespersonInfo> {
        let rs = self.get_salesperson(&id)?;
        let guard = rs.read().await;
        Some(guard.info())
    }

    /// Every salesperson, active or not, in roster order.
    pub async fn list_salespeople(&self) -> Vec<SalespersonInfo> {
        let mut all = Vec::new();
        for rs in self.all_salespeople() {
            let guard = rs.read().await;
            all.push((guard.seq, guard.info()));
        }
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, info)| info).collect()
    }

    pub async fn get_rules(&self, salesperson_id: Ulid) -> Vec<WeeklyRule> {
        let Some(rs) = self.get_salesperson(&salesperson_id) else {
            return vec![];
        };
        let guard = rs.read().await;
        let mut rules = guard.rules.clone();
        rules.sort_by_key(|r| (r.weekday, r.start_minute));
        rules
    }

    pub async fn get_blackouts(&self, salesperson_id: Ulid) -> Vec<Blackout> {
        let Some(rs) = self.get_salesperson(&salesperson_id) else {
            return vec![];
        };
        rs.read().await.blackouts.clone()
    }

    /// All appointments of a salesperson, cancelled ones included.
    pub async fn get_appointments(&self, salesperson_id: Ulid) -> Vec<Appointment> {
        let Some(rs) = self.get_salesperson(&salesperson_id) else {
            return vec![];
        };
        rs.read().await.appointments.clone()
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let salesperson_id = self.get_salesperson_for_entity(&id)?;
        let rs = self.get_salesperson(&salesperson_id)?;
        let guard = rs.read().await;
        guard.appointment(id).cloned()
    }

    /// Appointments for `lead_id` across every salesperson.
    pub async fn appointments_for_lead(&self, lead_id: &str) -> Vec<Appointment> {
        let mut found = Vec::new();
        for rs in self.all_salespeople() {
            let guard = rs.read().await;
            found.extend(
                guard
                    .appointments
                    .iter()
                    .filter(|a| a.lead_id.as_deref() == Some(lead_id))
                    .cloned(),
            );
        }
        found.sort_by_key(|a| a.scheduled_at);
        found
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_minutes.load(Ordering::Relaxed)
    }
}
