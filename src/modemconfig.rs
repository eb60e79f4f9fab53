//! Per-SIM configuration, loaded from a section of the SIM config INI file.

use ini::Ini;
use tracing::{error, warn};

use crate::helper::cleanup_phone_number;

/// Self-test scheduling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestInterval {
    Daily,
    Weekly,
    Monthly,
}

impl SelfTestInterval {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

/// Configuration for a single modem/SIM, read from one INI section.
#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub identifier: String,
    pub enabled: bool,
    pub baud: u32,
    pub port: String,
    pub pin: Option<String>,
    pub wait_for_start: u64,
    pub wait_for_delivery: bool,
    pub phone_number: Option<String>,
    pub ussd_account_balance: Option<String>,
    pub ussd_account_balance_regexp: Option<String>,
    pub currency: String,
    pub account_balance_warning: f64,
    pub account_balance_critical: f64,
    pub prefixes: Vec<String>,
    pub costs_per_sms: f64,
    pub health_check_interval: u64,
    pub sms_self_test_interval: String,
    pub imei: Option<String>,
    pub encoding: String,
    pub email_address: Option<String>,
}

impl ModemConfig {
    /// Validate this configuration. Mirrors the original's mix of hard failures
    /// (return `false`) and soft warnings (logged, does not fail).
    #[must_use]
    pub fn verify(&self) -> bool {
        if !self.enabled {
            return true;
        }

        if self.account_balance_critical > self.account_balance_warning {
            error!(
                modem = %self.identifier,
                "account balance threshold for critical larger than warning threshold"
            );
            return false;
        }

        for prefix in &self.prefixes {
            if cleanup_phone_number(prefix).is_none() {
                error!(modem = %self.identifier, prefix, "prefix is not valid");
                return false;
            }
        }

        if self.health_check_interval <= 60 {
            warn!(modem = %self.identifier, "it is not recommended to perform health checks too often");
        }

        match self.phone_number.as_deref() {
            Some(p) if cleanup_phone_number(p).is_some() => {}
            other => {
                error!(modem = %self.identifier, phone_number = ?other, "phone number is not valid");
                return false;
            }
        }

        if self
            .ussd_account_balance
            .as_deref()
            .is_none_or(str::is_empty)
        {
            warn!(modem = %self.identifier, "no USSD definition for checking account balance defined");
        } else if self
            .ussd_account_balance_regexp
            .as_deref()
            .is_none_or(str::is_empty)
        {
            warn!(
                modem = %self.identifier,
                "there is no regular expression defined to extract the account balance from the USSD response"
            );
        }

        if SelfTestInterval::parse(&self.sms_self_test_interval).is_none() {
            warn!(modem = %self.identifier, "the SMS self test interval cannot be parsed");
            return false;
        }

        if self.port.contains('*') && self.imei.as_deref().is_none_or(str::is_empty) {
            warn!(
                modem = %self.identifier,
                "there is no fixed serial port set and the expected IMEI is not specified, too"
            );
            return false;
        }

        true
    }
}

/// Read one modem's configuration out of the parsed SIM config file.
///
/// `sms_self_test_interval` comes from `[modempool]` in the main config, not
/// from the SIM section itself — every modem shares the pool-wide cadence.
pub fn read_modem_config(
    identifier: &str,
    sim_config: &Ini,
    sms_self_test_interval: &str,
) -> ModemConfig {
    let section = sim_config.section(Some(identifier));
    let get = |key: &str| section.and_then(|s| s.get(key)).map(str::to_string);
    let get_bool = |key: &str, default: bool| {
        section
            .and_then(|s| s.get(key))
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    };
    let get_int = |key: &str, default: u64| {
        section
            .and_then(|s| s.get(key))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default)
    };
    let get_float = |key: &str, default: f64| {
        section
            .and_then(|s| s.get(key))
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    };

    ModemConfig {
        identifier: identifier.to_string(),
        enabled: get_bool("enabled", true),
        baud: u32::try_from(get_int("baud", 115_200)).unwrap_or(115_200),
        port: get("port").unwrap_or_default(),
        pin: get("pin"),
        wait_for_start: get_int("wait_for_start", 60),
        wait_for_delivery: get_bool("wait_for_delivery", false),
        phone_number: get("phone_number"),
        ussd_account_balance: get("ussd_account_balance"),
        ussd_account_balance_regexp: get("ussd_account_balance_regexp"),
        currency: get("currency").unwrap_or_else(|| "EUR".to_string()),
        account_balance_warning: get_float("account_balance_warning", 5.0),
        account_balance_critical: get_float("account_balance_critical", 1.0),
        prefixes: get("prefixes")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        costs_per_sms: get_float("costs_per_sms", 0.0),
        health_check_interval: get_int("health_check_interval", 600),
        sms_self_test_interval: sms_self_test_interval.to_string(),
        imei: get("imei"),
        encoding: get("encoding").unwrap_or_else(|| "GSM".to_string()),
        email_address: get("email_address"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ModemConfig {
        ModemConfig {
            identifier: "sim0".into(),
            enabled: true,
            baud: 115_200,
            port: "/dev/ttyUSB0".into(),
            pin: None,
            wait_for_start: 60,
            wait_for_delivery: false,
            phone_number: Some("+15551234567".into()),
            ussd_account_balance: None,
            ussd_account_balance_regexp: None,
            currency: "EUR".into(),
            account_balance_warning: 5.0,
            account_balance_critical: 1.0,
            prefixes: vec!["+1".into()],
            costs_per_sms: 0.01,
            health_check_interval: 600,
            sms_self_test_interval: "daily".into(),
            imei: None,
            encoding: "GSM".into(),
            email_address: None,
        }
    }

    #[test]
    fn disabled_config_always_verifies() {
        let mut c = base_config();
        c.enabled = false;
        c.phone_number = None;
        assert!(c.verify());
    }

    #[test]
    fn balance_thresholds_inverted_fails() {
        let mut c = base_config();
        c.account_balance_critical = 10.0;
        c.account_balance_warning = 1.0;
        assert!(!c.verify());
    }

    #[test]
    fn malformed_prefix_fails() {
        let mut c = base_config();
        c.prefixes = vec!["not-a-number".into()];
        assert!(!c.verify());
    }

    #[test]
    fn bad_self_test_interval_fails() {
        let mut c = base_config();
        c.sms_self_test_interval = "yearly".into();
        assert!(!c.verify());
    }

    #[test]
    fn wildcard_port_without_imei_fails() {
        let mut c = base_config();
        c.port = "/dev/ttyUSB*".into();
        c.imei = None;
        assert!(!c.verify());
    }

    #[test]
    fn wildcard_port_with_imei_ok() {
        let mut c = base_config();
        c.port = "/dev/ttyUSB*".into();
        c.imei = Some("490154203237518".into());
        assert!(c.verify());
    }

    #[test]
    fn read_modem_config_applies_fallback_defaults() {
        let mut ini = Ini::new();
        ini.with_section(Some("sim0"))
            .set("port", "/dev/ttyUSB0")
            .set("phone_number", "+15551234567")
            .set("costs_per_sms", "0.02");
        let cfg = read_modem_config("sim0", &ini, "weekly");
        assert_eq!(cfg.baud, 115_200);
        assert_eq!(cfg.health_check_interval, 600);
        assert_eq!(cfg.currency, "EUR");
        assert_eq!(cfg.encoding, "GSM");
        assert_eq!(cfg.sms_self_test_interval, "weekly");
        assert!(cfg.prefixes.is_empty());
    }
}
