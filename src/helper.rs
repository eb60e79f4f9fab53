//! Small stateless helpers shared by several components.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;

static PHONE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+\d+$").unwrap());

/// Strip everything but digits and `+`, then require the result to match
/// `^\+\d+$` — a leading `+` followed by one or more digits and nothing else.
#[must_use]
pub fn cleanup_phone_number(phone_number: &str) -> Option<String> {
    let cleaned: String = phone_number
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    PHONE_NUMBER_RE.is_match(&cleaned).then_some(cleaned)
}

/// Refuse to start if a configuration file is world-readable.
pub fn check_file_permissions(path: &Path) -> Result<(), ConfigError> {
    let meta = std::fs::metadata(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if meta.permissions().mode() & 0o004 != 0 {
        return Err(ConfigError::WorldReadable {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// Highest severity in a list of health states, `OK` if the list is empty.
#[must_use]
pub fn highest_warning_level(states: &[crate::health::HealthState]) -> crate::health::HealthState {
    use crate::health::HealthState::{Critical, Ok as OkState, Warning};
    let mut highest = OkState;
    for s in states {
        match s {
            Critical => return Critical,
            Warning if highest == OkState => highest = Warning,
            _ => {}
        }
    }
    highest
}

/// Check a clear-text token against a bcrypt hash.
pub fn check_token(token: &str, hash: &str) -> bool {
    bcrypt::verify(token, hash).unwrap_or(false)
}

/// Check a clear-text token against a list of bcrypt hashes; any match authenticates.
#[must_use]
pub fn check_token_in_list(token: &str, hashes: &[String]) -> bool {
    hashes.iter().any(|h| check_token(token, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_accepts_plus_prefixed_digits() {
        assert_eq!(
            cleanup_phone_number("+1 (555) 123-4567"),
            Some("+15551234567".to_string())
        );
    }

    #[test]
    fn cleanup_rejects_letters_only() {
        assert_eq!(cleanup_phone_number("not a number"), None);
    }

    #[test]
    fn cleanup_rejects_bare_plus() {
        assert_eq!(cleanup_phone_number("+"), None);
    }

    #[test]
    fn cleanup_rejects_digits_without_plus() {
        assert_eq!(cleanup_phone_number("0041791234567"), None);
    }

    #[test]
    fn highest_warning_level_empty_is_ok() {
        assert_eq!(highest_warning_level(&[]), crate::health::HealthState::Ok);
    }

    #[test]
    fn token_in_list_matches_any_hash() {
        let hash = bcrypt::hash("secret", bcrypt::DEFAULT_COST).unwrap();
        let other = bcrypt::hash("other", bcrypt::DEFAULT_COST).unwrap();
        assert!(check_token_in_list("secret", &[other, hash]));
        assert!(!check_token_in_list("wrong", &[]));
    }
}
