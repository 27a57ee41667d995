use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::*;

use super::EngineError;

/// Persistence boundary for timeframes, bookings and the entities they refer to.
///
/// `timeframes` returns booking timeframes as well, so priority resolution sees them.
pub trait TimeframeStore: Send + Sync {
    fn timeframes(&self, filter: &StoreFilter) -> Result<Vec<Timeframe>, EngineError>;
    fn bookings(&self, filter: &StoreFilter) -> Result<Vec<Booking>, EngineError>;
    fn booking(&self, id: TimeframeId) -> Result<Option<Booking>, EngineError>;
    /// Persists a new booking and returns it with its assigned id.
    fn insert_booking(&self, booking: Booking) -> Result<Booking, EngineError>;
    fn update_booking(&self, booking: Booking) -> Result<Booking, EngineError>;
    fn location(&self, id: LocationId) -> Result<Option<Location>, EngineError>;
    fn item(&self, id: ItemId) -> Result<Option<Item>, EngineError>;
    fn user(&self, id: UserId) -> Result<Option<User>, EngineError>;
}

/// Everything the binary loads at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub locations: Vec<Location>,
    pub items: Vec<Item>,
    pub users: Vec<User>,
    pub timeframes: Vec<Timeframe>,
    pub bookings: Vec<Booking>,
}

pub struct InMemoryStore {
    timeframes: DashMap<TimeframeId, Timeframe>,
    bookings: DashMap<TimeframeId, Booking>,
    locations: DashMap<LocationId, Location>,
    items: DashMap<ItemId, Item>,
    users: DashMap<UserId, User>,
    next_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            timeframes: DashMap::new(),
            bookings: DashMap::new(),
            locations: DashMap::new(),
            items: DashMap::new(),
            users: DashMap::new(),
            next_id: AtomicU64::new(UNSAVED_ID + 1),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, EngineError> {
        let store = Self::new();
        for location in snapshot.locations {
            store.insert_location(location);
        }
        for item in snapshot.items {
            store.insert_item(item);
        }
        for user in snapshot.users {
            store.insert_user(user);
        }
        for tf in snapshot.timeframes {
            store.insert_timeframe(tf)?;
        }
        for booking in snapshot.bookings {
            if booking.id() == UNSAVED_ID {
                store.insert_booking(booking)?;
            } else {
                store.restore_booking(booking)?;
            }
        }
        Ok(store)
    }

    // ── Entities ─────────────────────────────────────────────

    pub fn insert_location(&self, location: Location) {
        self.locations.insert(location.id, location);
    }

    pub fn insert_item(&self, item: Item) {
        self.items.insert(item.id, item);
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    // ── Timeframes ───────────────────────────────────────────

    /// Adds a non-booking timeframe. A zero id gets the next free one.
    pub fn insert_timeframe(&self, mut tf: Timeframe) -> Result<TimeframeId, EngineError> {
        if tf.kind.is_booking() {
            return Err(EngineError::Validation(format!(
                "timeframe {}: bookings are inserted as bookings",
                tf.id
            )));
        }
        tf.validate()?;
        if tf.id == UNSAVED_ID {
            tf.id = self.allocate_id();
        } else {
            self.claim_id(tf.id)?;
        }
        let id = tf.id;
        self.timeframes.insert(id, tf);
        Ok(id)
    }

    /// Re-inserts a booking under its existing id.
    pub fn restore_booking(&self, booking: Booking) -> Result<Booking, EngineError> {
        booking.timeframe.validate()?;
        self.claim_id(booking.id())?;
        self.bookings.insert(booking.id(), booking.clone());
        Ok(booking)
    }

    pub fn timeframe_count(&self) -> usize {
        self.timeframes.len()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    fn allocate_id(&self) -> TimeframeId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn claim_id(&self, id: TimeframeId) -> Result<(), EngineError> {
        if self.timeframes.contains_key(&id) || self.bookings.contains_key(&id) {
            return Err(EngineError::Validation(format!("duplicate id {id}")));
        }
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
        Ok(())
    }
}

impl TimeframeStore for InMemoryStore {
    fn timeframes(&self, filter: &StoreFilter) -> Result<Vec<Timeframe>, EngineError> {
        let plain = self
            .timeframes
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone());
        let from_bookings = self
            .bookings
            .iter()
            .filter(|e| filter.matches_booking(e.value()))
            .map(|e| e.value().timeframe.clone());
        Ok(plain.chain(from_bookings).collect())
    }

    fn bookings(&self, filter: &StoreFilter) -> Result<Vec<Booking>, EngineError> {
        Ok(self
            .bookings
            .iter()
            .filter(|e| filter.matches_booking(e.value()))
            .map(|e| e.value().clone())
            .collect())
    }

    fn booking(&self, id: TimeframeId) -> Result<Option<Booking>, EngineError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    fn insert_booking(&self, mut booking: Booking) -> Result<Booking, EngineError> {
        booking.timeframe.id = self.allocate_id();
        booking.timeframe.validate()?;
        self.bookings.insert(booking.id(), booking.clone());
        Ok(booking)
    }

    fn update_booking(&self, booking: Booking) -> Result<Booking, EngineError> {
        booking.timeframe.validate()?;
        match self.bookings.get_mut(&booking.id()) {
            Some(mut slot) => {
                *slot = booking.clone();
                Ok(booking)
            }
            None => Err(EngineError::NotFound(booking.id())),
        }
    }

    fn location(&self, id: LocationId) -> Result<Option<Location>, EngineError> {
        Ok(self.locations.get(&id).map(|e| e.value().clone()))
    }

    fn item(&self, id: ItemId) -> Result<Option<Item>, EngineError> {
        Ok(self.items.get(&id).map(|e| e.value().clone()))
    }

    fn user(&self, id: UserId) -> Result<Option<User>, EngineError> {
        Ok(self.users.get(&id).map(|e| e.value().clone()))
    }
}
