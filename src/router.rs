//! Prefix/cost based routing table mapping destination numbers to modems.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::health::{Health, HealthState};

/// Shared, lock-guarded health reading for a single modem — updated by the
/// modem's own worker thread, read synchronously by the router/pool.
pub type HealthHandle = Arc<Mutex<Health>>;

/// Routes outbound SMS to the cheapest healthy modem registered under a
/// matching destination prefix.
#[derive(Default)]
pub struct SmsRouter {
    routes: HashMap<String, HashSet<String>>,
    costs: HashMap<String, f64>,
    modem: HashMap<String, HealthHandle>,
}

impl SmsRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a modem under a set of dialing prefixes with its per-SMS cost.
    pub fn add(
        &mut self,
        identifier: impl Into<String>,
        prefixes: &[String],
        cost: f64,
        health: HealthHandle,
    ) {
        let identifier = identifier.into();
        self.modem.insert(identifier.clone(), health);
        self.costs.insert(identifier.clone(), cost);
        for prefix in prefixes {
            self.routes
                .entry(prefix.clone())
                .or_default()
                .insert(identifier.clone());
        }
    }

    /// Resolve the cheapest healthy modem registered under any sub-prefix of
    /// `number`, from the full length down to length 2 — a single-character
    /// prefix is never considered, matching the original implementation's
    /// exact (if slightly surprising) behavior.
    #[must_use]
    pub fn get(&self, number: &str) -> Option<String> {
        let chars: Vec<char> = number.chars().collect();
        let len = chars.len();
        if len < 2 {
            return None;
        }

        let mut candidates = HashSet::new();
        for sub_len in (2..=len).rev() {
            let sub_prefix: String = chars[..sub_len].iter().collect();
            let Some(identifiers) = self.routes.get(&sub_prefix) else {
                continue;
            };
            for identifier in identifiers {
                let Some(handle) = self.modem.get(identifier) else {
                    continue;
                };
                if handle.lock().unwrap().state == HealthState::Ok {
                    candidates.insert(identifier.clone());
                }
            }
        }

        candidates
            .into_iter()
            .min_by(|a, b| self.costs[a].partial_cmp(&self.costs[b]).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(state: HealthState) -> HealthHandle {
        Arc::new(Mutex::new(Health {
            state,
            message: None,
        }))
    }

    #[test]
    fn never_matches_single_character_prefix() {
        let mut router = SmsRouter::new();
        router.add(
            "a",
            &["1".to_string()],
            0.01,
            health(HealthState::Ok),
        );
        // "1" itself is length 1, so even an exact single-digit number never
        // matches, by design.
        assert_eq!(router.get("1"), None);
    }

    #[test]
    fn matches_longest_registered_two_char_prefix() {
        let mut router = SmsRouter::new();
        router.add("a", &["+1".to_string()], 0.02, health(HealthState::Ok));
        router.add("b", &["+15".to_string()], 0.01, health(HealthState::Ok));
        // both "+1" and "+15" match "+15551234567"; "b" is cheaper.
        assert_eq!(router.get("+15551234567"), Some("b".to_string()));
    }

    #[test]
    fn skips_unhealthy_modems() {
        let mut router = SmsRouter::new();
        router.add("a", &["+1".to_string()], 0.01, health(HealthState::Critical));
        router.add("b", &["+1".to_string()], 0.05, health(HealthState::Ok));
        assert_eq!(router.get("+15551234567"), Some("b".to_string()));
    }

    #[test]
    fn returns_none_when_no_prefix_matches() {
        let mut router = SmsRouter::new();
        router.add("a", &["+44".to_string()], 0.01, health(HealthState::Ok));
        assert_eq!(router.get("+15551234567"), None);
    }

    #[test]
    fn returns_none_when_all_matches_unhealthy() {
        let mut router = SmsRouter::new();
        router.add("a", &["+1".to_string()], 0.01, health(HealthState::Warning));
        assert_eq!(router.get("+15551234567"), None);
    }
}
