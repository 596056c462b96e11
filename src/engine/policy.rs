use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Book, then cancel the lead's other scheduled appointments held by a
    /// different salesperson. A lead keeps at most one salesperson at a time;
    /// several appointments with the same salesperson are allowed.
    ///
    /// The new booking is committed first, so a failed booking never loses
    /// the lead's existing appointment.
    pub async fn book_for_lead(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let appt = self.book(req).await?;
        let Some(lead_id) = appt.lead_id.as_deref() else {
            return Ok(appt);
        };

        for prior in self.appointments_for_lead(lead_id).await {
            if prior.id == appt.id
                || prior.salesperson_id == appt.salesperson_id
                || prior.status != AppointmentStatus::Scheduled
            {
                continue;
            }
            match self.cancel(prior.id).await {
                Ok(_) => info!(
                    "lead {lead_id} moved to {}; cancelled {} with {}",
                    appt.salesperson_id, prior.id, prior.salesperson_id
                ),
                Err(e) => warn!("lead {lead_id}: could not cancel superseded {}: {e}", prior.id),
            }
        }
        Ok(appt)
    }

    /// Let the allocator choose the salesperson, then book for the lead.
    /// `Ok(None)` when there is no active salesperson to route to.
    pub async fn route_and_book(
        &self,
        id: Ulid,
        lead_id: Option<String>,
        scheduled_at: Ms,
        duration_minutes: u32,
        notes: Option<String>,
    ) -> Result<Option<Appointment>, EngineError> {
        let Some(salesperson) = self.pick_next().await else {
            return Ok(None);
        };
        let req = BookingRequest {
            id,
            salesperson_id: salesperson.id,
            lead_id,
            scheduled_at,
            duration_minutes,
            notes,
        };
        self.book_for_lead(req).await.map(Some)
    }
}
