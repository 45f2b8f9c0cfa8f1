use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Indexed in-memory records. Only [`InMemoryStore::apply_event`] mutates;
/// the engine calls it after the event is durable.
pub struct InMemoryStore {
    experts: DashMap<Ulid, Expert>,
    slots: DashMap<Ulid, AvailableSlot>,
    bookings: DashMap<Ulid, Booking>,
    notifications: DashMap<Ulid, Notification>,
    slots_by_expert: DashMap<Ulid, Vec<Ulid>>,
    bookings_by_expert: DashMap<Ulid, Vec<Ulid>>,
    bookings_by_user: DashMap<Ulid, Vec<Ulid>>,
    notifications_by_user: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn index_push(index: &DashMap<Ulid, Vec<Ulid>>, owner: Ulid, id: Ulid) {
    index.entry(owner).or_default().push(id);
}

fn collect_ids<T: Clone>(
    index: &DashMap<Ulid, Vec<Ulid>>,
    owner: &Ulid,
    records: &DashMap<Ulid, T>,
) -> Vec<T> {
    let ids = index.get(owner).map(|e| e.value().clone()).unwrap_or_default();
    ids.iter()
        .filter_map(|id| records.get(id).map(|r| r.value().clone()))
        .collect()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            experts: DashMap::new(),
            slots: DashMap::new(),
            bookings: DashMap::new(),
            notifications: DashMap::new(),
            slots_by_expert: DashMap::new(),
            bookings_by_expert: DashMap::new(),
            bookings_by_user: DashMap::new(),
            notifications_by_user: DashMap::new(),
        }
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn expert(&self, id: &Ulid) -> Option<Expert> {
        self.experts.get(id).map(|e| e.value().clone())
    }

    pub fn slot(&self, id: &Ulid) -> Option<AvailableSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn notification(&self, id: &Ulid) -> Option<Notification> {
        self.notifications.get(id).map(|e| e.value().clone())
    }

    // ── Range queries ────────────────────────────────────────

    /// All of an expert's slots, ascending by start then id.
    pub fn expert_slots(&self, expert_id: &Ulid) -> Vec<AvailableSlot> {
        let mut slots = collect_ids(&self.slots_by_expert, expert_id, &self.slots);
        slots.sort_by_key(|s| (s.span.start, s.id));
        slots
    }

    pub fn expert_slot_count(&self, expert_id: &Ulid) -> usize {
        self.slots_by_expert.get(expert_id).map_or(0, |ids| ids.len())
    }

    /// All of an expert's bookings, ascending by start then id.
    pub fn expert_bookings(&self, expert_id: &Ulid) -> Vec<Booking> {
        let mut bookings = collect_ids(&self.bookings_by_expert, expert_id, &self.bookings);
        bookings.sort_by_key(|b| (b.span.start, b.id));
        bookings
    }

    /// All of a user's bookings, ascending by start then id.
    pub fn user_bookings(&self, user_id: &Ulid) -> Vec<Booking> {
        let mut bookings = collect_ids(&self.bookings_by_user, user_id, &self.bookings);
        bookings.sort_by_key(|b| (b.span.start, b.id));
        bookings
    }

    /// Full scan. Worker passes only.
    pub fn bookings_matching(&self, pred: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut hits: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(|b| (b.span.start, b.id));
        hits
    }

    /// A user's ledger, newest first.
    pub fn user_notifications(&self, user_id: &Ulid) -> Vec<Notification> {
        let mut list = collect_ids(&self.notifications_by_user, user_id, &self.notifications);
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list
    }

    pub fn notification_ids_created_before(&self, cutoff: Ms) -> Vec<Ulid> {
        self.notifications
            .iter()
            .filter(|e| e.value().created_at < cutoff)
            .map(|e| *e.key())
            .collect()
    }

    // ── Snapshot ─────────────────────────────────────────────

    /// Events that rebuild the current state from an empty store.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events: Vec<Event> = Vec::new();
        events.extend(self.experts.iter().map(|e| Event::ExpertRegistered {
            expert: e.value().clone(),
        }));
        events.extend(self.slots.iter().map(|e| Event::SlotAdded {
            slot: e.value().clone(),
        }));
        events.extend(self.bookings.iter().map(|e| Event::BookingCreated {
            booking: e.value().clone(),
            slot_id: None,
        }));
        events.extend(self.notifications.iter().map(|e| Event::NotificationAppended {
            notification: e.value().clone(),
        }));
        events
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::ExpertRegistered { expert } => {
                self.experts.insert(expert.id, expert.clone());
            }
            Event::ExpertAvailabilityChanged { id, is_available } => {
                if let Some(mut expert) = self.experts.get_mut(id) {
                    expert.is_available = *is_available;
                }
            }
            Event::SlotAdded { slot } => {
                if self.slots.insert(slot.id, slot.clone()).is_none() {
                    index_push(&self.slots_by_expert, slot.expert_id, slot.id);
                }
            }
            Event::SlotBooked { id } => self.set_slot_booked(id, true),
            Event::SlotFreed { id } => self.set_slot_booked(id, false),
            Event::SlotRetired { id } => {
                if let Some(mut slot) = self.slots.get_mut(id) {
                    slot.retired = true;
                }
            }
            Event::BookingCreated { booking, slot_id } => {
                if self.bookings.insert(booking.id, booking.clone()).is_none() {
                    index_push(&self.bookings_by_expert, booking.expert_id, booking.id);
                    index_push(&self.bookings_by_user, booking.user_id, booking.id);
                }
                if let Some(slot_id) = slot_id {
                    self.set_slot_booked(slot_id, true);
                }
            }
            Event::BookingStatusChanged { id, status } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.status = *status;
                }
            }
            Event::BookingCancelled {
                id,
                reason,
                freed_slot,
            } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.status = BookingStatus::Cancelled;
                    booking.cancel_reason = reason.clone();
                }
                if let Some(slot_id) = freed_slot {
                    self.set_slot_booked(slot_id, false);
                }
            }
            Event::BookingMissed { id, freed_slot } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.status = BookingStatus::Missed;
                }
                if let Some(slot_id) = freed_slot {
                    self.set_slot_booked(slot_id, false);
                }
            }
            Event::ReminderSent { id, at } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.reminder_sent_at = Some(*at);
                }
            }
            Event::NotificationAppended { notification } => {
                let n = notification;
                if self.notifications.insert(n.id, n.clone()).is_none() {
                    index_push(&self.notifications_by_user, n.user_id, n.id);
                }
            }
            Event::NotificationRead { id } => {
                if let Some(mut n) = self.notifications.get_mut(id) {
                    n.is_read = true;
                }
            }
            Event::NotificationsPurged { ids } => {
                for id in ids {
                    if let Some((_, n)) = self.notifications.remove(id)
                        && let Some(mut owned) = self.notifications_by_user.get_mut(&n.user_id)
                    {
                        owned.retain(|x| x != id);
                    }
                }
            }
        }
    }

    fn set_slot_booked(&self, id: &Ulid, booked: bool) {
        if let Some(mut slot) = self.slots.get_mut(id) {
            slot.is_booked = booked;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(expert_id: Ulid, start: Ms, end: Ms) -> AvailableSlot {
        AvailableSlot {
            id: Ulid::new(),
            expert_id,
            span: Span::new(start, end),
            is_booked: false,
            retired: false,
        }
    }

    fn booking(user_id: Ulid, expert_id: Ulid, span: Span) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id,
            expert_id,
            span,
            status: BookingStatus::Pending,
            notes: None,
            format: None,
            cancel_reason: None,
            created_at: 0,
            reminder_sent_at: None,
        }
    }

    #[test]
    fn slots_come_back_sorted_by_start() {
        let store = InMemoryStore::new();
        let expert = Ulid::new();
        for start in [300, 100, 200] {
            store.apply_event(&Event::SlotAdded {
                slot: slot(expert, start, start + 50),
            });
        }
        let starts: Vec<Ms> = store.expert_slots(&expert).iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
        assert_eq!(store.expert_slot_count(&expert), 3);
        assert!(store.expert_slots(&Ulid::new()).is_empty());
    }

    #[test]
    fn booking_created_marks_slot_and_indexes_both_owners() {
        let store = InMemoryStore::new();
        let (user, expert) = (Ulid::new(), Ulid::new());
        let s = slot(expert, 100, 200);
        store.apply_event(&Event::SlotAdded { slot: s.clone() });

        let b = booking(user, expert, s.span);
        store.apply_event(&Event::BookingCreated {
            booking: b.clone(),
            slot_id: Some(s.id),
        });

        assert!(store.slot(&s.id).unwrap().is_booked);
        assert_eq!(store.user_bookings(&user), vec![b.clone()]);
        assert_eq!(store.expert_bookings(&expert), vec![b]);
    }

    #[test]
    fn cancellation_records_reason_and_frees_slot() {
        let store = InMemoryStore::new();
        let (user, expert) = (Ulid::new(), Ulid::new());
        let s = slot(expert, 100, 200);
        store.apply_event(&Event::SlotAdded { slot: s.clone() });
        let b = booking(user, expert, s.span);
        store.apply_event(&Event::BookingCreated {
            booking: b.clone(),
            slot_id: Some(s.id),
        });

        store.apply_event(&Event::BookingCancelled {
            id: b.id,
            reason: Some("sick".into()),
            freed_slot: Some(s.id),
        });
        let after = store.booking(&b.id).unwrap();
        assert_eq!(after.status, BookingStatus::Cancelled);
        assert_eq!(after.cancel_reason.as_deref(), Some("sick"));
        assert!(!store.slot(&s.id).unwrap().is_booked);
    }

    #[test]
    fn purge_unindexes_notifications() {
        let store = InMemoryStore::new();
        let user = Ulid::new();
        let mut ids = Vec::new();
        for t in [10, 20, 30] {
            let n = Notification {
                id: Ulid::new(),
                user_id: user,
                title: "t".into(),
                message: "m".into(),
                kind: NotificationKind::Booking,
                is_read: false,
                created_at: t,
            };
            ids.push(n.id);
            store.apply_event(&Event::NotificationAppended { notification: n });
        }
        let old = store.notification_ids_created_before(25);
        assert_eq!(old.len(), 2);
        store.apply_event(&Event::NotificationsPurged { ids: old });

        let left = store.user_notifications(&user);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, ids[2]);
    }

    #[test]
    fn snapshot_rebuilds_equal_state() {
        let store = InMemoryStore::new();
        let (user, expert) = (Ulid::new(), Ulid::new());
        store.apply_event(&Event::ExpertRegistered {
            expert: Expert {
                id: expert,
                user_id: Ulid::new(),
                is_available: true,
            },
        });
        let s = slot(expert, 100, 200);
        store.apply_event(&Event::SlotAdded { slot: s.clone() });
        let b = booking(user, expert, s.span);
        store.apply_event(&Event::BookingCreated {
            booking: b.clone(),
            slot_id: Some(s.id),
        });
        store.apply_event(&Event::BookingStatusChanged {
            id: b.id,
            status: BookingStatus::Confirmed,
        });

        let rebuilt = InMemoryStore::new();
        for e in store.snapshot() {
            rebuilt.apply_event(&e);
        }
        assert_eq!(rebuilt.expert(&expert), store.expert(&expert));
        assert_eq!(rebuilt.expert_slots(&expert), store.expert_slots(&expert));
        assert!(rebuilt.slot(&s.id).unwrap().is_booked);
        assert_eq!(rebuilt.booking(&b.id).unwrap().status, BookingStatus::Confirmed);
    }
}
