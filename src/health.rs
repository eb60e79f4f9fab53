//! Health state levels shared by every component that can report status.

use std::fmt;

/// Ordered health level: OK < WARNING < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum HealthState {
    #[default]
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Ok => "OK",
            HealthState::Warning => "WARNING",
            HealthState::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// A health reading: a level plus an optional human-readable message.
#[derive(Debug, Clone, Default)]
pub struct Health {
    pub state: HealthState,
    pub message: Option<String>,
}

impl Health {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            state: HealthState::Ok,
            message: None,
        }
    }

    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            state: HealthState::Warning,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            state: HealthState::Critical,
            message: Some(message.into()),
        }
    }
}

/// Combine a list of health readings, worst state wins. Non-empty messages are
/// joined with `"; "`. An empty list is `OK`.
#[must_use]
pub fn highest(readings: &[Health]) -> Health {
    let state = readings
        .iter()
        .map(|h| h.state)
        .max()
        .unwrap_or(HealthState::Ok);
    let message = readings
        .iter()
        .filter_map(|h| h.message.as_deref())
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    Health {
        state,
        message: if message.is_empty() {
            None
        } else {
            Some(message)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_ok_lt_warning_lt_critical() {
        assert!(HealthState::Ok < HealthState::Warning);
        assert!(HealthState::Warning < HealthState::Critical);
    }

    #[test]
    fn highest_of_empty_is_ok() {
        let h = highest(&[]);
        assert_eq!(h.state, HealthState::Ok);
        assert!(h.message.is_none());
    }

    #[test]
    fn highest_worst_wins() {
        let h = highest(&[
            Health::ok(),
            Health::warning("a"),
            Health::critical("b"),
            Health::warning("c"),
        ]);
        assert_eq!(h.state, HealthState::Critical);
        assert_eq!(h.message.as_deref(), Some("a; b; c"));
    }

    #[test]
    fn highest_no_critical_stays_warning() {
        let h = highest(&[Health::ok(), Health::warning("a")]);
        assert_eq!(h.state, HealthState::Warning);
    }
}
