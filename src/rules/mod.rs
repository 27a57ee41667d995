//! Configurable booking rules.
//!
//! Rules live in a static registry of [`BookingRule`] descriptors. A
//! [`RuleConfigSource`] binds them to parameters and category scopes, producing
//! an ordered [`RuleSet`] that is evaluated until the first rule objects.

mod builtin;

pub use builtin::{
    ChainBooking, MaxBookingDays, MaxBookingsPerMonth, MaxBookingsPerWeek, SimultaneousBooking,
    month_window, week_window,
};

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_RULE_PARAMS;
use crate::model::{Booking, TermId};
use crate::observability;

/// Evaluation behind a rule. `None` or an empty list means the booking is fine.
pub trait RuleCheck: Send + Sync {
    fn check(
        &self,
        engine: &Engine,
        booking: &Booking,
        params: &[i64],
        scope: Option<&BTreeSet<TermId>>,
    ) -> Result<Option<Vec<Booking>>, EngineError>;

    /// Rejects parameter values the check cannot work with.
    fn validate_params(&self, _params: &[i64]) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A declared parameter and the configuration slot (1..=3) it is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleParam {
    pub slot: u8,
    pub description: &'static str,
}

#[derive(Clone, Copy, Serialize)]
pub struct BookingRule {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub error_message: &'static str,
    pub params: &'static [RuleParam],
    #[serde(skip)]
    pub check: &'static dyn RuleCheck,
}

impl fmt::Debug for BookingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookingRule")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

static REGISTRY: [BookingRule; 5] = [
    BookingRule {
        name: "noSimultaneousBooking",
        title: "Forbid simultaneous Bookings",
        description: "Users can no longer book two items on the same day.",
        error_message: "You can not book more than one item at a time.",
        params: &[],
        check: &SimultaneousBooking,
    },
    BookingRule {
        name: "prohibitChainBooking",
        title: "Prohibit chain-bookings",
        description: "Users can no longer work around the maximum booking limit by chaining two bookings directly after another.",
        error_message: "You have reached your booking limit. Please leave some time in between bookings.",
        params: &[],
        check: &ChainBooking,
    },
    BookingRule {
        name: "maxBookingDays",
        title: "Maximum of bookable days in time period",
        description: "Allow x booked days over the period of y days for user.",
        error_message: "Booking limit exceeded. You can only book a limited number of days in this period.",
        params: &[
            RuleParam { slot: 1, description: "Number of allowed days" },
            RuleParam { slot: 2, description: "Period in days" },
        ],
        check: &MaxBookingDays,
    },
    BookingRule {
        name: "maxBookingPerWeek",
        title: "Maximum of bookable days per week",
        description: "Allow x booked days per week for user.",
        error_message: "Booking limit exceeded. You can only book a limited number of days per week.",
        params: &[
            RuleParam { slot: 1, description: "Number of allowed days per week" },
            RuleParam { slot: 3, description: "Day the week resets (0 = Monday)" },
        ],
        check: &MaxBookingsPerWeek,
    },
    BookingRule {
        name: "maxBookingPerMonth",
        title: "Maximum of bookable days per month",
        description: "Allow x booked days per month for user.",
        error_message: "Booking limit exceeded. You can only book a limited number of days per month.",
        params: &[
            RuleParam { slot: 1, description: "Number of allowed days per month" },
            RuleParam { slot: 3, description: "Day of month the count resets" },
        ],
        check: &MaxBookingsPerMonth,
    },
];

impl BookingRule {
    pub fn all() -> &'static [BookingRule] {
        &REGISTRY
    }

    pub fn find(name: &str) -> Option<&'static BookingRule> {
        REGISTRY.iter().find(|r| r.name == name)
    }

    /// `(name, title)` pairs for admin selection lists.
    pub fn rules_for_select() -> Vec<(&'static str, &'static str)> {
        REGISTRY.iter().map(|r| (r.name, r.title)).collect()
    }

    /// The registry as JSON, for admin forms.
    pub fn rules_json() -> Result<String, EngineError> {
        serde_json::to_string(&REGISTRY).map_err(|e| EngineError::Store(e.to_string()))
    }
}

/// A rule bound to parameters and a scope.
#[derive(Debug, Clone)]
pub struct BookingRuleApplied {
    rule: BookingRule,
    applies_to_all: bool,
    applied_terms: BTreeSet<TermId>,
    params: Vec<i64>,
}

impl BookingRuleApplied {
    /// `params` are positional in the order the rule declares them.
    /// Rules that declare none ignore whatever is passed.
    pub fn new(
        rule: BookingRule,
        applies_to_all: bool,
        applied_terms: BTreeSet<TermId>,
        params: Vec<i64>,
    ) -> Result<Self, EngineError> {
        if !applies_to_all && applied_terms.is_empty() {
            return Err(EngineError::Configuration(format!(
                "rule {} applies to no categories",
                rule.name
            )));
        }
        let params = if rule.params.is_empty() {
            Vec::new()
        } else if params.len() != rule.params.len() {
            return Err(EngineError::Configuration(format!(
                "rule {} expects {} parameters, got {}",
                rule.name,
                rule.params.len(),
                params.len()
            )));
        } else {
            params
        };
        rule.check.validate_params(&params)?;
        Ok(Self {
            rule,
            applies_to_all,
            applied_terms,
            params,
        })
    }

    /// `Ok(None)` for rule types the registry does not know.
    pub fn from_config(config: &RuleConfig) -> Result<Option<Self>, EngineError> {
        let Some(rule) = BookingRule::find(&config.rule_type) else {
            debug!("ignoring unknown rule type {:?}", config.rule_type);
            return Ok(None);
        };
        let params = rule
            .params
            .iter()
            .filter_map(|p| config.param(p.slot))
            .collect();
        let terms = config.categories.iter().copied().collect();
        Self::new(*rule, config.applies_to_all, terms, params).map(Some)
    }

    pub fn rule(&self) -> &BookingRule {
        &self.rule
    }

    pub fn params(&self) -> &[i64] {
        &self.params
    }

    /// Conflicting bookings, or `None` when the rule has no objection.
    pub fn check_compliance(
        &self,
        engine: &Engine,
        booking: &Booking,
    ) -> Result<Option<Vec<Booking>>, EngineError> {
        if engine.is_user_privileged(booking)? {
            return Ok(None);
        }
        let scope = if self.applies_to_all {
            None
        } else {
            if !engine.terms_apply(booking, &self.applied_terms)? {
                debug!("rule {} skipped: categories do not apply", self.rule.name);
                return Ok(None);
            }
            Some(&self.applied_terms)
        };
        let started = Instant::now();
        let result = self.rule.check.check(engine, booking, &self.params, scope)?;
        metrics::histogram!(observability::RULE_EVALUATION_SECONDS, "rule" => self.rule.name)
            .record(started.elapsed().as_secs_f64());
        Ok(result.filter(|conflicts| !conflicts.is_empty()))
    }
}

/// One configured rule as stored by the host. Values may arrive as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "rule-type")]
    pub rule_type: String,
    #[serde(rename = "rule-applies-all", default, deserialize_with = "loose_flag")]
    pub applies_to_all: bool,
    #[serde(rename = "rule-applies-categories", default)]
    pub categories: Vec<TermId>,
    #[serde(rename = "rule-param1", default, deserialize_with = "loose_param")]
    pub param1: Option<i64>,
    #[serde(rename = "rule-param2", default, deserialize_with = "loose_param")]
    pub param2: Option<i64>,
    #[serde(rename = "rule-param3", default, deserialize_with = "loose_param")]
    pub param3: Option<i64>,
}

impl RuleConfig {
    pub fn param(&self, slot: u8) -> Option<i64> {
        debug_assert!(usize::from(slot) <= MAX_RULE_PARAMS);
        match slot {
            1 => self.param1,
            2 => self.param2,
            3 => self.param3,
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Int(i64),
    Str(String),
}

fn loose_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Option::<Loose>::deserialize(d)? {
        None => false,
        Some(Loose::Bool(b)) => b,
        Some(Loose::Int(i)) => i != 0,
        Some(Loose::Str(s)) => matches!(s.trim(), "on" | "true" | "1" | "yes"),
    })
}

fn loose_param<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    match Option::<Loose>::deserialize(d)? {
        None => Ok(None),
        Some(Loose::Int(i)) => Ok(Some(i)),
        Some(Loose::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Loose::Str(s)) => s.trim().parse().map(Some).map_err(D::Error::custom),
        Some(Loose::Bool(_)) => Err(D::Error::custom("rule parameter must be a number")),
    }
}

/// Where rule configuration comes from. Read once per evaluation.
pub trait RuleConfigSource: Send + Sync {
    /// `None` when there is no usable configuration at all.
    fn rule_configs(&self) -> Option<Vec<RuleConfig>>;
}

impl RuleConfigSource for Vec<RuleConfig> {
    fn rule_configs(&self) -> Option<Vec<RuleConfig>> {
        Some(self.clone())
    }
}

/// Rule configuration kept as a JSON array on disk.
pub struct JsonRuleFile {
    path: PathBuf,
}

impl JsonRuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleConfigSource for JsonRuleFile {
    fn rule_configs(&self) -> Option<Vec<RuleConfig>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cannot read rules file {}: {e}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(configs) => Some(configs),
            Err(e) => {
                warn!("invalid rules file {}: {e}", self.path.display());
                None
            }
        }
    }
}

/// Ordered, bound rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<BookingRuleApplied>,
}

impl RuleSet {
    pub fn new(rules: Vec<BookingRuleApplied>) -> Self {
        Self { rules }
    }

    pub fn from_configs(configs: Option<Vec<RuleConfig>>) -> Result<Self, EngineError> {
        let configs = configs
            .ok_or_else(|| EngineError::Configuration("No valid booking rules found".into()))?;
        let mut rules = Vec::with_capacity(configs.len());
        for config in &configs {
            if let Some(applied) = BookingRuleApplied::from_config(config)? {
                rules.push(applied);
            }
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BookingRuleApplied> {
        self.rules.iter()
    }

    /// Stops at the first rule reporting conflicts and turns them into a denial.
    pub fn evaluate(&self, engine: &Engine, booking: &Booking) -> Result<(), EngineError> {
        for applied in &self.rules {
            if let Some(conflicts) = applied.check_compliance(engine, booking)? {
                return Err(denial(engine, applied.rule(), &conflicts)?);
            }
        }
        Ok(())
    }
}

fn denial(
    engine: &Engine,
    rule: &BookingRule,
    conflicts: &[Booking],
) -> Result<EngineError, EngineError> {
    let mut message = rule.error_message.to_string();
    for booking in conflicts {
        message.push('\n');
        message.push_str(&engine.describe_booking(booking)?);
    }
    Ok(EngineError::BookingDenied {
        rule: rule.name,
        message,
        conflicts: conflicts.iter().map(Booking::id).collect(),
    })
}

impl Engine {
    pub fn rule_set(&self) -> Result<RuleSet, EngineError> {
        RuleSet::from_configs(self.rule_source().rule_configs())
    }

    /// Runs the configured rules against `booking`.
    ///
    /// Unusable configuration allows the booking and leaves a warning for admins.
    pub fn booking_conforms_to_rules(&self, booking: &Booking) -> Result<(), EngineError> {
        let rules = match self.rule_set() {
            Ok(rules) => rules,
            Err(EngineError::Configuration(msg)) => {
                warn!("booking rules not applied: {msg}");
                metrics::counter!(observability::RULES_FAIL_OPEN_TOTAL).increment(1);
                self.set_config_warning(Some(msg));
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if rules.is_empty() {
            return Ok(());
        }
        if self.is_user_privileged(booking)? {
            debug!("user {} is privileged, rules skipped", booking.author);
            return Ok(());
        }
        let result = rules.evaluate(self, booking);
        if let Err(EngineError::BookingDenied { rule, conflicts, .. }) = &result {
            metrics::counter!(observability::BOOKINGS_DENIED_TOTAL, "rule" => *rule).increment(1);
            info!(
                "booking by user {} denied by {rule} ({} conflicts)",
                booking.author,
                conflicts.len()
            );
        }
        result
    }

    /// Builds the rule set once and records any configuration problem as the admin warning.
    pub fn validate_rules(&self) -> Result<(), EngineError> {
        match self.rule_set() {
            Ok(_) => {
                self.set_config_warning(None);
                Ok(())
            }
            Err(e) => {
                self.set_config_warning(Some(e.to_string()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> RuleConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn registry_names_are_unique() {
        let names: BTreeSet<_> = BookingRule::all().iter().map(|r| r.name).collect();
        assert_eq!(names.len(), BookingRule::all().len());
        assert!(
            BookingRule::rules_for_select()
                .iter()
                .any(|(name, _)| *name == "noSimultaneousBooking")
        );
    }

    #[test]
    fn rules_json_is_valid() {
        let json = BookingRule::rules_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(5));
        assert_eq!(parsed[2]["params"][1]["slot"], 2);
    }

    #[test]
    fn config_accepts_string_values() {
        let c = config(
            r#"{"rule-type":"maxBookingPerWeek","rule-applies-all":"on","rule-param1":"2","rule-param3":"0"}"#,
        );
        assert!(c.applies_to_all);
        assert_eq!(c.param(1), Some(2));
        assert_eq!(c.param(2), None);
        assert_eq!(c.param(3), Some(0));
        let applied = BookingRuleApplied::from_config(&c).unwrap().unwrap();
        assert_eq!(applied.params(), &[2, 0]);
    }

    #[test]
    fn config_rejects_non_numeric_param() {
        let res: Result<RuleConfig, _> =
            serde_json::from_str(r#"{"rule-type":"maxBookingDays","rule-param1":"two"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn unknown_rule_type_is_ignored() {
        let c = config(r#"{"rule-type":"noSuchRule","rule-applies-all":true}"#);
        assert!(BookingRuleApplied::from_config(&c).unwrap().is_none());
        let set = RuleSet::from_configs(Some(vec![c])).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn scoped_rule_needs_terms() {
        let rule = *BookingRule::find("noSimultaneousBooking").unwrap();
        let err = BookingRuleApplied::new(rule, false, BTreeSet::new(), vec![]).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(BookingRuleApplied::new(rule, false, BTreeSet::from([3]), vec![]).is_ok());
    }

    #[test]
    fn param_count_must_match() {
        let rule = *BookingRule::find("maxBookingDays").unwrap();
        let err = BookingRuleApplied::new(rule, true, BTreeSet::new(), vec![2]).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(BookingRuleApplied::new(rule, true, BTreeSet::new(), vec![2, 30]).is_ok());
    }

    #[test]
    fn paramless_rule_ignores_extra_params() {
        let rule = *BookingRule::find("prohibitChainBooking").unwrap();
        let applied = BookingRuleApplied::new(rule, true, BTreeSet::new(), vec![1, 2, 3]).unwrap();
        assert!(applied.params().is_empty());
    }

    #[test]
    fn out_of_range_reset_day_rejected() {
        let rule = *BookingRule::find("maxBookingPerWeek").unwrap();
        assert!(BookingRuleApplied::new(rule, true, BTreeSet::new(), vec![2, 7]).is_err());
        let rule = *BookingRule::find("maxBookingPerMonth").unwrap();
        assert!(BookingRuleApplied::new(rule, true, BTreeSet::new(), vec![2, 0]).is_err());
    }

    #[test]
    fn missing_configuration_is_an_error() {
        assert!(matches!(
            RuleSet::from_configs(None),
            Err(EngineError::Configuration(_))
        ));
    }
}
