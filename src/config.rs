//! Configuration loading from the two INI files: the main gateway config
//! (`[server]`, `[api]`, `[mail]`, `[modempool]`, `[logging]`, `[seccomp]`)
//! and the SIM config (one section per modem identifier).
//!
//! ```ini
//! [server]
//! listen = 0.0.0.0:7000
//! certificate = /etc/smsgated/server.crt
//! key = /etc/smsgated/server.key
//! ca_certificate = /etc/smsgated/ca.crt
//!
//! [api]
//! enable_send_sms = true
//! enable_send_ussd = true
//! token_send_sms = <bcrypt hash> <bcrypt hash>
//! token_send_ussd = <bcrypt hash>
//! token_get_health_state = <bcrypt hash>
//! token_get_stats = <bcrypt hash>
//! token_sim0_get_sms = <bcrypt hash>
//!
//! [mail]
//! enabled = true
//! server = smtp.example.com
//! port = 465
//! user = gateway
//! password = secret
//! recipient = ops@example.com
//!
//! [modempool]
//! serial_ports_hint_file = /var/lib/smsgated/serial-ports.hint
//! sms_self_test_interval = daily
//! health_check_interval = 600
//!
//! [logging]
//! level = info
//!
//! [seccomp]
//! enabled = true
//! ```

use std::collections::HashMap;
use std::path::Path;

use ini::Ini;

use crate::error::ConfigError;
use crate::helper::check_file_permissions;
use crate::modemconfig::{read_modem_config, ModemConfig};
use crate::rpc::RpcTokens;
use crate::smtp::SmtpConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub certificate: String,
    pub key: String,
    pub ca_certificate: Option<String>,
    pub max_connections: usize,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub enable_send_sms: bool,
    pub enable_send_ussd: bool,
}

#[derive(Debug, Clone)]
pub struct ModemPoolConfig {
    pub serial_ports_hint_file: String,
    pub sms_self_test_interval: String,
    pub health_check_interval: u64,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct SeccompConfig {
    pub enabled: bool,
}

/// `sctl supervise`-style crash-restart policy for the `supervise` subcommand.
/// Not part of the original INI format — an ambient addition, defaults only.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_backoff: u64,
    pub stable_threshold: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_backoff: 60,
            stable_threshold: 30,
        }
    }
}

pub struct Config {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub mail: Option<SmtpConfig>,
    pub modempool: ModemPoolConfig,
    pub logging: LoggingConfig,
    pub seccomp: SeccompConfig,
    pub supervisor: SupervisorConfig,
    pub tokens: RpcTokens,
}

fn get<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section)).and_then(|s| s.get(key))
}

fn require<'a>(ini: &'a Ini, section: &str, key: &str) -> Result<&'a str, ConfigError> {
    get(ini, section, key).ok_or_else(|| ConfigError::MissingKey {
        section: section.to_string(),
        key: key.to_string(),
    })
}

fn get_bool(ini: &Ini, section: &str, key: &str, default: bool) -> bool {
    get(ini, section, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_int(ini: &Ini, section: &str, key: &str, default: u64) -> u64 {
    get(ini, section, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Load the main gateway configuration file.
pub fn load_main_config(path: &Path) -> Result<Config, ConfigError> {
    check_file_permissions(path)?;
    let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let server = ServerConfig {
        listen: get(&ini, "server", "listen")
            .unwrap_or("0.0.0.0:7000")
            .to_string(),
        certificate: require(&ini, "server", "certificate")?.to_string(),
        key: require(&ini, "server", "key")?.to_string(),
        ca_certificate: get(&ini, "server", "ca_certificate").map(str::to_string),
        max_connections: get_int(&ini, "server", "max_connections", 32) as usize,
    };

    let api = ApiConfig {
        enable_send_sms: get_bool(&ini, "api", "enable_send_sms", false),
        enable_send_ussd: get_bool(&ini, "api", "enable_send_ussd", false),
    };

    let mail_enabled = get_bool(&ini, "mail", "enabled", true);
    let mail = if mail_enabled {
        Some(SmtpConfig {
            host: require(&ini, "mail", "server")?.to_string(),
            port: get_int(&ini, "mail", "port", 465) as u16,
            username: require(&ini, "mail", "user")?.to_string(),
            password: require(&ini, "mail", "password")?.to_string(),
            from: get(&ini, "mail", "user").unwrap_or_default().to_string(),
            recipient: require(&ini, "mail", "recipient")?.to_string(),
        })
    } else {
        None
    };

    let modempool = ModemPoolConfig {
        serial_ports_hint_file: require(&ini, "modempool", "serial_ports_hint_file")?.to_string(),
        sms_self_test_interval: get(&ini, "modempool", "sms_self_test_interval")
            .unwrap_or("daily")
            .to_string(),
        health_check_interval: get_int(&ini, "modempool", "health_check_interval", 600),
    };

    let logging = LoggingConfig {
        level: get(&ini, "logging", "level").unwrap_or("info").to_string(),
    };

    let seccomp = SeccompConfig {
        enabled: get_bool(&ini, "seccomp", "enabled", true),
    };

    let tokens = read_tokens(&ini);

    Ok(Config {
        server,
        api,
        mail,
        modempool,
        logging,
        seccomp,
        supervisor: SupervisorConfig::default(),
        tokens,
    })
}

fn split_hashes(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn read_tokens(ini: &Ini) -> RpcTokens {
    RpcTokens {
        send_sms: split_hashes(get(ini, "api", "token_send_sms")),
        send_ussd: split_hashes(get(ini, "api", "token_send_ussd")),
        get_health_state: split_hashes(get(ini, "api", "token_get_health_state")),
        get_stats: split_hashes(get(ini, "api", "token_get_stats")),
        get_sms: HashMap::new(),
    }
}

/// Fill in `get_sms` per-modem-identifier token lists once the SIM identifiers
/// are known — the original reads these as `token_<identifier>_get_sms`.
pub fn read_get_sms_tokens(
    path: &Path,
    identifiers: &[String],
) -> Result<HashMap<String, Vec<String>>, ConfigError> {
    let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    let mut tokens = HashMap::new();
    for identifier in identifiers {
        let key = format!("token_{identifier}_get_sms");
        if let Some(value) = get(&ini, "api", &key) {
            tokens.insert(identifier.clone(), split_hashes(Some(value)));
        }
    }
    Ok(tokens)
}

/// Load the SIM config file and build one `ModemConfig` per section.
pub fn load_sim_config(path: &Path, sms_self_test_interval: &str) -> Result<Vec<ModemConfig>, ConfigError> {
    check_file_permissions(path)?;
    let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    Ok(ini
        .sections()
        .flatten()
        .map(|identifier| read_modem_config(identifier, &ini, sms_self_test_interval))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        std::fs::set_permissions(file.path(), PermissionsExt::from_mode(0o600)).unwrap();
        file
    }

    #[test]
    fn load_main_config_applies_defaults() {
        let file = write_temp(
            "[server]\ncertificate = /tmp/c.crt\nkey = /tmp/c.key\n\
             [mail]\nenabled = false\n\
             [modempool]\nserial_ports_hint_file = /tmp/hints\n",
        );
        let config = load_main_config(file.path()).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7000");
        assert!(config.mail.is_none());
        assert_eq!(config.modempool.sms_self_test_interval, "daily");
    }

    #[test]
    fn load_main_config_missing_certificate_fails() {
        let file = write_temp("[server]\nkey = /tmp/c.key\n[modempool]\nserial_ports_hint_file = /tmp/hints\n");
        assert!(matches!(
            load_main_config(file.path()),
            Err(ConfigError::MissingKey { .. })
        ));
    }

    #[test]
    fn load_sim_config_reads_one_section_per_modem() {
        let file = write_temp(
            "[sim0]\nport = /dev/ttyUSB0\nphone_number = +15551234567\n\
             [sim1]\nport = /dev/ttyUSB1\nphone_number = +15557654321\n",
        );
        let configs = load_sim_config(file.path(), "daily").unwrap();
        assert_eq!(configs.len(), 2);
    }
}
