use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const SECOND: Ms = 1_000;
pub const MINUTE: Ms = 60 * SECOND;
pub const HOUR: Ms = 60 * MINUTE;
pub const DAY: Ms = 24 * HOUR;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for caller-supplied bounds.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Experts ──────────────────────────────────────────────────────

/// What the scheduler knows about an expert. The profile itself lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expert {
    pub id: Ulid,
    /// The user account that acts for this expert.
    pub user_id: Ulid,
    pub is_available: bool,
}

// ── Slots ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub id: Ulid,
    pub expert_id: Ulid,
    pub span: Span,
    pub is_booked: bool,
    /// Soft-deleted: no longer listed, matched, or counted for overlap.
    pub retired: bool,
}

impl AvailableSlot {
    pub fn is_free(&self) -> bool {
        !self.is_booked && !self.retired
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
    Missed,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected
                | BookingStatus::Cancelled
                | BookingStatus::Completed
                | BookingStatus::Missed
        )
    }

    /// Whether a booking in this status still claims its interval for
    /// conflict purposes. Only cancelled and completed bookings give it up.
    pub fn holds_interval(self) -> bool {
        !matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Every edge of the booking lifecycle, whoever drives it.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Rejected)
                | (Pending, Missed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::Missed => "missed",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "rejected" => Ok(BookingStatus::Rejected),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            "missed" => Ok(BookingStatus::Missed),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsultationFormat {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub expert_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub format: Option<ConsultationFormat>,
    pub cancel_reason: Option<String>,
    pub created_at: Ms,
    /// Set once the one-hour reminder went out; never cleared.
    pub reminder_sent_at: Option<Ms>,
}

// ── Notification ledger ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Booking,
    Reminder,
    Cancellation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub user_id: Ulid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: Ms,
}

/// One committed mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ExpertRegistered {
        expert: Expert,
    },
    ExpertAvailabilityChanged {
        id: Ulid,
        is_available: bool,
    },
    SlotAdded {
        slot: AvailableSlot,
    },
    SlotBooked {
        id: Ulid,
    },
    SlotFreed {
        id: Ulid,
    },
    SlotRetired {
        id: Ulid,
    },
    /// Inserts the booking and, when `slot_id` is set, marks that slot booked.
    BookingCreated {
        booking: Booking,
        slot_id: Option<Ulid>,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
    },
    BookingCancelled {
        id: Ulid,
        reason: Option<String>,
        freed_slot: Option<Ulid>,
    },
    BookingMissed {
        id: Ulid,
        freed_slot: Option<Ulid>,
    },
    ReminderSent {
        id: Ulid,
        at: Ms,
    },
    NotificationAppended {
        notification: Notification,
    },
    NotificationRead {
        id: Ulid,
    },
    NotificationsPurged {
        ids: Vec<Ulid>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub id: Ulid,
    pub expert_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

impl From<&AvailableSlot> for SlotInfo {
    fn from(slot: &AvailableSlot) -> Self {
        Self {
            id: slot.id,
            expert_id: slot.expert_id,
            start: slot.span.start,
            end: slot.span.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 101), Some(Span::new(100, 101)));
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer)); // self-containment
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        use BookingStatus::*;
        let all = [Pending, Confirmed, Rejected, Cancelled, Completed, Missed];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn lifecycle_edges() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Missed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(!Confirmed.can_transition_to(Missed));
        assert!(!Confirmed.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn only_cancelled_and_completed_release_the_interval() {
        use BookingStatus::*;
        assert!(Pending.holds_interval());
        assert!(Confirmed.holds_interval());
        assert!(Rejected.holds_interval());
        assert!(Missed.holds_interval());
        assert!(!Cancelled.holds_interval());
        assert!(!Completed.holds_interval());
    }

    #[test]
    fn status_string_roundtrip() {
        for s in ["pending", "confirmed", "rejected", "cancelled", "completed", "missed"] {
            let parsed: BookingStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("approved".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                user_id: Ulid::new(),
                expert_id: Ulid::new(),
                span: Span::new(10 * HOUR, 11 * HOUR),
                status: BookingStatus::Pending,
                notes: Some("first session".into()),
                format: Some(ConsultationFormat::Online),
                cancel_reason: None,
                created_at: 0,
                reminder_sent_at: None,
            },
            slot_id: Some(Ulid::new()),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
