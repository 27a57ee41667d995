mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{DaySlot, merge_overlapping, subtract_intervals};
pub use conflict::BLOCKING_STATUSES;
pub use error::EngineError;
pub use mutations::{BookingRequest, SaveOutcome};
pub use queries::{DateSelector, TimeframeQuery, higher_priority, parse_date, parse_instant};
pub use store::{InMemoryStore, Snapshot, TimeframeStore};

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

use crate::config::EngineSettings;
use crate::grid;
use crate::model::*;
use crate::rules::RuleConfigSource;

pub struct Engine {
    store: Arc<dyn TimeframeStore>,
    settings: EngineSettings,
    rule_source: Arc<dyn RuleConfigSource>,
    /// Held around validate+persist so two requests for one location/item pair serialise.
    slot_locks: DashMap<(LocationId, ItemId), Arc<Mutex<()>>>,
    /// Last rule configuration problem, shown to admins.
    config_warning: Mutex<Option<String>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn TimeframeStore>,
        settings: EngineSettings,
        rule_source: Arc<dyn RuleConfigSource>,
    ) -> Self {
        Self {
            store,
            settings,
            rule_source,
            slot_locks: DashMap::new(),
            config_warning: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &dyn TimeframeStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn rule_source(&self) -> &dyn RuleConfigSource {
        self.rule_source.as_ref()
    }

    pub fn config_warning(&self) -> Option<String> {
        self.config_warning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_config_warning(&self, warning: Option<String>) {
        *self
            .config_warning
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = warning;
    }

    pub(super) fn slot_lock(&self, location: LocationId, item: ItemId) -> Arc<Mutex<()>> {
        self.slot_locks
            .entry((location, item))
            .or_default()
            .value()
            .clone()
    }

    /// Global admins and admins of the booked item or location bypass all rules.
    pub fn is_user_privileged(&self, booking: &Booking) -> Result<bool, EngineError> {
        if self
            .store
            .user(booking.author)?
            .is_some_and(|u| u.is_admin)
        {
            return Ok(true);
        }
        if self
            .store
            .item(booking.item_id())?
            .is_some_and(|i| i.admins.contains(&booking.author))
        {
            return Ok(true);
        }
        Ok(self
            .store
            .location(booking.location_id())?
            .is_some_and(|l| l.admins.contains(&booking.author)))
    }

    /// Whether the booking's item or location carries one of `terms`.
    pub fn terms_apply(
        &self,
        booking: &Booking,
        terms: &BTreeSet<TermId>,
    ) -> Result<bool, EngineError> {
        if self
            .store
            .item(booking.item_id())?
            .is_some_and(|i| !i.categories.is_disjoint(terms))
        {
            return Ok(true);
        }
        Ok(self
            .store
            .location(booking.location_id())?
            .is_some_and(|l| !l.categories.is_disjoint(terms)))
    }

    /// One line of a denial message: `"<pickup> - <return> | <item> @ <location>"`.
    pub fn describe_booking(&self, booking: &Booking) -> Result<String, EngineError> {
        let item = self
            .store
            .item(booking.item_id())?
            .map_or_else(|| "Unknown".to_string(), |i| i.title);
        let location = self
            .store
            .location(booking.location_id())?
            .map_or_else(|| "Unknown".to_string(), |l| l.title);
        Ok(format!(
            "{} - {} | {item} @ {location}",
            grid::format_pickup(booking),
            grid::format_return(booking)
        ))
    }
}
