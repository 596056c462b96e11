use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only absolute time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Recurring weekly window during which a salesperson takes meetings.
/// Times are minutes since local midnight in the organisation's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRule {
    pub id: Ulid,
    /// 0 = Sunday … 6 = Saturday.
    pub weekday: u8,
    pub start_minute: u16,
    pub end_minute: u16,
    pub granularity_minutes: u16,
}

impl WeeklyRule {
    /// Whether `minute` falls in `[start, end)`.
    pub fn covers(&self, minute: u16) -> bool {
        self.start_minute <= minute && minute < self.end_minute
    }

    /// Candidate slot starts, granularity-aligned from `start_minute`.
    pub fn candidates(&self) -> impl Iterator<Item = u16> + '_ {
        let step = self.granularity_minutes.max(1) as usize;
        (self.start_minute..self.end_minute).step_by(step)
    }
}

/// One-off absolute interval during which a salesperson cannot be booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blackout {
    pub id: Ulid,
    pub span: Span,
    pub reason: Option<String>,
}

impl Blackout {
    /// A slot starting exactly when the blackout ends is still blocked:
    /// both ends are inclusive.
    pub fn blocks(&self, t: Ms) -> bool {
        self.span.start <= t && t <= self.span.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub id: Ulid,
    pub salesperson_id: Ulid,
    pub lead_id: Option<String>,
    pub scheduled_at: Ms,
    pub duration_minutes: u32,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
}

impl Appointment {
    /// Cancelled appointments keep their row but release the instant.
    pub fn holds_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn end(&self) -> Ms {
        self.scheduled_at + self.duration_minutes as Ms * MINUTE_MS
    }
}

/// Everything the engine knows about one salesperson. Guarded by a single
/// lock; every mutation of the calendar or the counter goes through it.
#[derive(Debug, Clone)]
pub struct SalespersonState {
    pub id: Ulid,
    /// Position in the roster (creation order). Ties in the allocator are
    /// broken by this.
    pub seq: u64,
    pub name: String,
    pub contact: Option<String>,
    pub target_share: f64,
    pub active: bool,
    pub leads_received: u64,
    pub rules: Vec<WeeklyRule>,
    /// Sorted by `span.start`.
    pub blackouts: Vec<Blackout>,
    /// Sorted by `scheduled_at`; cancelled rows are kept for audit.
    pub appointments: Vec<Appointment>,
    /// Uniqueness index over non-cancelled appointments:
    /// scheduled instant → appointment id.
    booked: HashMap<Ms, Ulid>,
}

impl SalespersonState {
    pub fn new(id: Ulid, seq: u64, name: String, contact: Option<String>, target_share: f64, active: bool) -> Self {
        Self {
            id,
            seq,
            name,
            contact,
            target_share,
            active,
            leads_received: 0,
            rules: Vec::new(),
            blackouts: Vec::new(),
            appointments: Vec::new(),
            booked: HashMap::new(),
        }
    }

    pub fn info(&self) -> SalespersonInfo {
        SalespersonInfo {
            id: self.id,
            name: self.name.clone(),
            contact: self.contact.clone(),
            target_share: self.target_share,
            active: self.active,
            leads_received: self.leads_received,
        }
    }

    pub fn rules_for_weekday(&self, weekday: u8) -> impl Iterator<Item = &WeeklyRule> {
        self.rules.iter().filter(move |r| r.weekday == weekday)
    }

    pub fn remove_rule(&mut self, id: Ulid) -> Option<WeeklyRule> {
        let pos = self.rules.iter().position(|r| r.id == id)?;
        Some(self.rules.remove(pos))
    }

    /// Insert blackout maintaining sort order by span.start.
    pub fn insert_blackout(&mut self, blackout: Blackout) {
        let pos = self
            .blackouts
            .binary_search_by_key(&blackout.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.blackouts.insert(pos, blackout);
    }

    pub fn remove_blackout(&mut self, id: Ulid) -> Option<Blackout> {
        let pos = self.blackouts.iter().position(|b| b.id == id)?;
        Some(self.blackouts.remove(pos))
    }

    /// Blackouts touching the closed window `[query.start, query.end]`.
    /// Everything at index >= right_bound starts after the window.
    pub fn blackouts_touching(&self, query: &Span) -> impl Iterator<Item = &Blackout> {
        let right_bound = self
            .blackouts
            .partition_point(|b| b.span.start <= query.end);
        self.blackouts[..right_bound]
            .iter()
            .filter(move |b| b.span.end >= query.start)
    }

    pub fn is_blacked_out(&self, t: Ms) -> bool {
        self.blackouts_touching(&Span { start: t, end: t })
            .any(|b| b.blocks(t))
    }

    /// Owner of the instant `t` in the uniqueness index, if any.
    pub fn booked_at(&self, t: Ms) -> Option<Ulid> {
        self.booked.get(&t).copied()
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Non-cancelled appointments starting inside `span`.
    pub fn active_appointments_in(&self, span: &Span) -> impl Iterator<Item = &Appointment> {
        let left = self
            .appointments
            .partition_point(|a| a.scheduled_at < span.start);
        let right = self
            .appointments
            .partition_point(|a| a.scheduled_at < span.end);
        self.appointments[left..right]
            .iter()
            .filter(|a| a.holds_slot())
    }

    pub fn has_scheduled_from(&self, now: Ms) -> bool {
        self.appointments
            .iter()
            .any(|a| a.status == AppointmentStatus::Scheduled && a.scheduled_at >= now)
    }

    /// Insert an appointment keeping `appointments` sorted and the index in
    /// sync. Callers must have checked `booked_at` first.
    pub fn insert_appointment(&mut self, appt: Appointment) {
        if appt.holds_slot() {
            self.booked.insert(appt.scheduled_at, appt.id);
        }
        let pos = self
            .appointments
            .partition_point(|a| a.scheduled_at <= appt.scheduled_at);
        self.appointments.insert(pos, appt);
    }

    pub fn move_appointment(&mut self, id: Ulid, new_at: Ms) {
        let Some(pos) = self.appointments.iter().position(|a| a.id == id) else {
            return;
        };
        let mut appt = self.appointments.remove(pos);
        if appt.holds_slot() && self.booked.get(&appt.scheduled_at) == Some(&id) {
            self.booked.remove(&appt.scheduled_at);
        }
        appt.scheduled_at = new_at;
        self.insert_appointment(appt);
    }

    pub fn set_status(&mut self, id: Ulid, status: AppointmentStatus) {
        let Some(appt) = self.appointments.iter_mut().find(|a| a.id == id) else {
            return;
        };
        appt.status = status;
        let at = appt.scheduled_at;
        if status == AppointmentStatus::Cancelled {
            if self.booked.get(&at) == Some(&id) {
                self.booked.remove(&at);
            }
        } else {
            self.booked.insert(at, id);
        }
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    UtcOffsetSet {
        minutes: i32,
    },
    SalespersonCreated {
        id: Ulid,
        name: String,
        contact: Option<String>,
        target_share: f64,
        active: bool,
    },
    SalespersonUpdated {
        id: Ulid,
        name: String,
        contact: Option<String>,
        target_share: f64,
        active: bool,
    },
    SalespersonDeleted {
        id: Ulid,
    },
    RuleAdded {
        salesperson_id: Ulid,
        rule: WeeklyRule,
    },
    RuleRemoved {
        id: Ulid,
        salesperson_id: Ulid,
    },
    BlackoutAdded {
        id: Ulid,
        salesperson_id: Ulid,
        span: Span,
        reason: Option<String>,
    },
    BlackoutRemoved {
        id: Ulid,
        salesperson_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        salesperson_id: Ulid,
        lead_id: Option<String>,
        scheduled_at: Ms,
        duration_minutes: u32,
        notes: Option<String>,
    },
    AppointmentRescheduled {
        id: Ulid,
        salesperson_id: Ulid,
        scheduled_at: Ms,
    },
    AppointmentCancelled {
        id: Ulid,
        salesperson_id: Ulid,
    },
    AppointmentCompleted {
        id: Ulid,
        salesperson_id: Ulid,
    },
    /// Restores a counter verbatim; emitted by compaction.
    CounterSet {
        salesperson_id: Ulid,
        leads_received: u64,
    },
    AssignmentRecorded {
        salesperson_id: Ulid,
    },
    CycleReset {
        salesperson_ids: Vec<Ulid>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SalespersonInfo {
    pub id: Ulid,
    pub name: String,
    pub contact: Option<String>,
    pub target_share: f64,
    pub active: bool,
    pub leads_received: u64,
}

/// Partial update for a salesperson; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SalespersonPatch {
    pub name: Option<String>,
    pub contact: Option<Option<String>>,
    pub target_share: Option<f64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub salesperson_id: Ulid,
    pub lead_id: Option<String>,
    pub scheduled_at: Ms,
    pub duration_minutes: u32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    NoScheduleForDay,
    OutsideBusinessHours,
    BlockedByManager,
    AlreadyBooked(Ulid),
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::NoScheduleForDay => write!(f, "no schedule defined for this day"),
            UnavailableReason::OutsideBusinessHours => write!(f, "outside business hours"),
            UnavailableReason::BlockedByManager => write!(f, "blocked by manager"),
            UnavailableReason::AlreadyBooked(_) => write!(f, "slot already booked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(UnavailableReason),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}
