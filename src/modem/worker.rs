//! `ModemWorker`: owns one modem's lifecycle — discovery, initialization,
//! sending/receiving SMS and USSD, and health checking.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ModemError;
use crate::health::{Health, HealthState};
use crate::modem::at::AtPort;
use crate::modemconfig::{ModemConfig, SelfTestInterval};
use crate::serialportmapper::SerialPortMapper;
use crate::sms::Sms;

/// RSSI (0-31, 99) to dBm, table copied verbatim from the modem this gateway
/// was originally written against. 2..=30 map into this table; >=31 (except
/// 99) is -51; 0, 1, 99 are all "unknown" -113.
const RSSI_TABLE: [i32; 29] = [
    -109, -107, -105, -103, -101, -99, -97, -95, -93, -91, -89, -87, -85, -83, -81, -79, -77, -75,
    -73, -71, -69, -67, -65, -63, -61, -59, -57, -55, -53,
];

#[must_use]
pub fn rssi_to_dbm(rssi: u8) -> i32 {
    match rssi {
        2..=30 => RSSI_TABLE[(rssi - 2) as usize],
        31..=98 => -51,
        _ => -113,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// Mutable, frequently-read status of a modem. Shared via `Arc<Mutex<_>>` with
/// the router (which only reads `.health`) and the pool/RPC stats endpoint.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub status: String,
    pub current_network: Option<String>,
    pub current_signal_dbm: i32,
    pub port: String,
    pub init_counter: u32,
    pub last_init: Option<DateTime<Utc>>,
    pub last_received: Option<DateTime<Utc>>,
    pub last_sent: Option<DateTime<Utc>>,
    pub sent: u64,
    pub received: u64,
    pub balance: Option<f64>,
    pub currency: String,
}

impl WorkerState {
    fn new(currency: String) -> Self {
        Self {
            status: "Not initialized.".to_string(),
            current_network: None,
            current_signal_dbm: -113,
            port: String::new(),
            init_counter: 0,
            last_init: None,
            last_received: None,
            last_sent: None,
            sent: 0,
            received: 0,
            balance: None,
            currency,
        }
    }
}

/// Owns one modem's serial port and all per-SIM state.
pub struct ModemWorker {
    pub config: ModemConfig,
    port_mapper: Arc<SerialPortMapper>,
    at: Mutex<Option<AtPort>>,
    state: Mutex<WorkerState>,
    /// Canonical health reading, shared (via `Arc` clone) with `SmsRouter` —
    /// this is the same handle the router reads synchronously to pick a
    /// destination modem, kept separate from `WorkerState` so a clone of one
    /// doesn't silently fork from the other.
    health: Arc<Mutex<Health>>,
    sent_sms: Mutex<HashMap<String, DeliveryStatus>>,
    inbound: Mutex<VecDeque<Sms>>,
    last_health_check: Mutex<Option<DateTime<Utc>>>,
    health_check_expected_token: Mutex<Option<String>>,
}

impl ModemWorker {
    #[must_use]
    pub fn new(config: ModemConfig, port_mapper: Arc<SerialPortMapper>) -> Self {
        let currency = config.currency.clone();
        Self {
            config,
            port_mapper,
            at: Mutex::new(None),
            state: Mutex::new(WorkerState::new(currency)),
            health: Arc::new(Mutex::new(Health::warning("modem is not initialized"))),
            sent_sms: Mutex::new(HashMap::new()),
            inbound: Mutex::new(VecDeque::new()),
            last_health_check: Mutex::new(None),
            health_check_expected_token: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    /// Shared health handle, as consumed by `SmsRouter`/`ModemPool`.
    #[must_use]
    pub fn health_handle(&self) -> Arc<Mutex<Health>> {
        self.health.clone()
    }

    #[must_use]
    pub fn current_health(&self) -> Health {
        self.health.lock().unwrap().clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> WorkerState {
        self.state.lock().unwrap().clone()
    }

    fn set_status(&self, status: impl Into<String>) {
        self.state.lock().unwrap().status = status.into();
    }

    fn set_health(&self, health: Health) {
        *self.health.lock().unwrap() = health;
    }

    fn is_connected(&self) -> bool {
        self.at.lock().unwrap().is_some()
    }

    /// Full initialization sequence: resolve the serial port, connect, unlock
    /// the SIM, wait for network coverage, purge stale unread SMS, enable
    /// unsolicited new-message notifications and start listening for them.
    pub async fn init(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            self.set_health(Health::ok());
            self.set_status("Disabled.");
            return true;
        }

        let Some(port) = self.find_port().await else {
            self.set_health(Health::critical("no serial port found for this modem"));
            return false;
        };

        let at = match AtPort::open(&port, self.config.baud) {
            Ok(at) => at,
            Err(e) => {
                error!(modem = %self.identifier(), error = %e, "failed to open serial port");
                self.set_health(Health::critical(format!("failed to open {port}: {e}")));
                return false;
            }
        };
        let urc_rx = at.take_urc_receiver();

        if let Some(ref pin) = self.config.pin {
            match at.command(&format!("AT+CPIN=\"{pin}\"")).await {
                Ok(_) => {}
                Err(ModemError::AtError(resp)) if resp.contains("+CME ERROR: 11") => {
                    // PIN required but not (yet) accepted — the SIM itself
                    // hasn't rejected anything, so this is retryable.
                    let err = ModemError::PinRequired;
                    warn!(modem = %self.identifier(), error = %err, "SIM still reports PIN required, will retry");
                    self.set_health(Health::critical(err.to_string()));
                    return false;
                }
                Err(ModemError::AtError(_)) => {
                    // Any other AT-level error in direct response to a PIN we
                    // just submitted means the SIM rejected that PIN. Never
                    // retried with the same value — fatal per the original's
                    // IncorrectPinError handling.
                    let err = ModemError::IncorrectPin;
                    error!(modem = %self.identifier(), error = %err, "fatal: SIM PIN rejected by modem");
                    std::process::exit(1);
                }
                Err(e) => {
                    warn!(modem = %self.identifier(), error = %e, "transient error during PIN unlock, will retry");
                    self.set_health(Health::critical(format!("PIN unlock failed: {e}")));
                    return false;
                }
            }
        }

        let wait = Duration::from_secs(self.config.wait_for_start);
        tokio::time::sleep(wait.min(Duration::from_secs(10))).await;

        let mut registered = false;
        for _ in 0..10 {
            if let Ok(resp) = at.command_with_timeout("AT+CREG?", Duration::from_secs(120)).await {
                if resp.contains(",1") || resp.contains(",5") {
                    registered = true;
                    break;
                }
            }
        }
        if !registered {
            let err = ModemError::NoNetworkCoverage;
            self.set_health(Health::critical(err.to_string()));
            return false;
        }

        // Purge unread SMS left over from a previous session.
        let _ = at.command("AT+CMGD=,2").await;
        // Text mode, and notify on every incoming SMS via +CMTI (stored to
        // SIM/ME, fetched with AT+CMGR) rather than pushing the PDU directly.
        let _ = at.command("AT+CMGF=1").await;
        let _ = at.command("AT+CNMI=2,1,0,0,0").await;

        *self.at.lock().unwrap() = Some(at);
        {
            let mut state = self.state.lock().unwrap();
            state.port = port;
            state.init_counter += 1;
            state.last_init = Some(Utc::now());
            state.status = "Ready.".to_string();
        }
        self.set_health(Health::ok());

        if let Some(urc_rx) = urc_rx {
            let worker = self.clone();
            tokio::spawn(async move { worker.run_urc_listener(urc_rx).await });
        }

        true
    }

    /// Listen for unsolicited new-message notifications and turn each into an
    /// inbound `Sms` via `AT+CMGR`, then delete it from storage.
    async fn run_urc_listener(self: Arc<Self>, mut urc_rx: mpsc::UnboundedReceiver<String>) {
        while let Some(line) = urc_rx.recv().await {
            let Some(index) = parse_cmti_index(&line) else {
                continue;
            };
            let Some(at) = self.at.lock().unwrap().clone() else {
                continue;
            };
            let resp = match at.command(&format!("AT+CMGR={index}")).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(modem = %self.identifier(), index, error = %e, "failed to fetch notified SMS");
                    continue;
                }
            };
            if let Some((sender, text, timestamp)) = parse_cmgr(&resp) {
                self.handle_incoming(text, sender, timestamp);
            } else {
                warn!(modem = %self.identifier(), index, "could not parse AT+CMGR response");
            }
            let _ = at.command(&format!("AT+CMGD={index}")).await;
        }
    }

    async fn find_port(&self) -> Option<String> {
        if !self.config.port.contains('*') {
            return Some(self.config.port.clone());
        }

        let delay = rand::thread_rng().gen_range(0..=15);
        tokio::time::sleep(Duration::from_secs(delay)).await;

        if let Some(ref imei) = self.config.imei {
            if let Some(hint) = self.port_mapper.get_mapping(imei) {
                if self.check_imei(&hint, imei).await.unwrap_or(false) {
                    return Some(hint);
                }
            }
        }

        let mut candidates: Vec<String> = glob::glob(&self.config.port)
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .filter_map(|p| p.to_str().map(str::to_string))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        let Some(ref imei) = self.config.imei else {
            return None;
        };
        for candidate in candidates {
            if self.check_imei(&candidate, imei).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        let err = ModemError::PortNotFound(imei.clone());
        error!(modem = %self.identifier(), error = %err, "no serial port matched");
        None
    }

    async fn check_imei(&self, port: &str, expected_imei: &str) -> Result<bool, crate::error::ModemError> {
        let at = AtPort::open(port, self.config.baud)?;
        for _ in 0..5 {
            for _ in 0..3 {
                let _ = at.command("AT&F").await;
            }
            for _ in 0..3 {
                let _ = at.command("ATZ").await;
            }
            let _ = at.command("ATE0").await;
            let _ = at.command("AT&W").await;
            if let Ok(resp) = at.command("AT+CGSN").await {
                let found: String = resp.chars().filter(|c| c.is_ascii_digit()).collect();
                if !found.is_empty() {
                    self.port_mapper.set_mapping(found.clone(), port.to_string());
                    return Ok(found == expected_imei);
                }
            }
        }
        Ok(false)
    }

    /// Enqueue an SMS for delivery. Returns immediately; actual send happens
    /// the next time the worker drains its outbound queue.
    pub async fn send_sms(&self, sms: &Sms) -> bool {
        let Some(at) = self.at.lock().unwrap().clone() else {
            return false;
        };
        let cmd = format!("AT+CMGS=\"{}\"", sms.recipient);
        match at
            .command_with_timeout(&cmd, Duration::from_secs(30))
            .await
        {
            Ok(_) => {
                self.sent_sms
                    .lock()
                    .unwrap()
                    .insert(sms.id.clone(), DeliveryStatus::Pending);
                let mut state = self.state.lock().unwrap();
                state.last_sent = Some(Utc::now());
                state.sent += 1;
                true
            }
            Err(e) => {
                warn!(modem = %self.identifier(), sms_id = %sms.id, error = %e, "failed to send SMS");
                false
            }
        }
    }

    #[must_use]
    pub fn get_delivery_status(&self, sms_id: &str) -> bool {
        matches!(
            self.sent_sms.lock().unwrap().get(sms_id),
            Some(DeliveryStatus::Delivered)
        )
    }

    /// Forget a sent SMS's tracking entry, but only once delivery is
    /// confirmed — a still-pending or failed id is left tracked so a later
    /// delivery report can still be matched against it.
    pub fn forget(&self, sms_id: &str) -> bool {
        let mut sent = self.sent_sms.lock().unwrap();
        if matches!(sent.get(sms_id), Some(DeliveryStatus::Delivered)) {
            sent.remove(sms_id);
            true
        } else {
            false
        }
    }

    /// Called by the transport layer when an inbound SMS arrives.
    pub fn handle_incoming(&self, text: String, sender: String, timestamp: DateTime<Utc>) {
        {
            let mut state = self.state.lock().unwrap();
            state.last_received = Some(Utc::now());
            state.received += 1;
        }

        let mut expected = self.health_check_expected_token.lock().unwrap();
        if let Some(ref token) = *expected {
            if text.contains(token.as_str()) {
                *expected = None;
            }
        }
        drop(expected);

        let sms = Sms::new(
            None,
            self.config.phone_number.clone().unwrap_or_default(),
            text,
            Some(timestamp),
            Some(sender),
            Some(self.identifier().to_string()),
            false,
        );
        self.inbound.lock().unwrap().push_back(sms);
    }

    #[must_use]
    pub fn has_sms(&self) -> bool {
        !self.inbound.lock().unwrap().is_empty()
    }

    pub fn take_sms(&self) -> Option<Sms> {
        self.inbound.lock().unwrap().pop_front()
    }

    /// Send a USSD code, decoding the response according to the configured
    /// encoding. `None` on modem/comms failure.
    pub async fn send_ussd(&self, code: &str) -> Option<String> {
        let at = self.at.lock().unwrap().clone()?;
        if self.config.encoding == "UCS2" {
            let ucs2_code: String = code
                .encode_utf16()
                .map(|u| format!("{u:04X}"))
                .collect();
            let cmd = format!("AT+CUSD=1,\"{ucs2_code}\",15");
            let resp = at
                .command_with_timeout(&cmd, Duration::from_secs(30))
                .await
                .ok()?;
            let decoded = decode_ucs2_response(&resp)?;
            self.set_status("Ready.");
            Some(fix_euro_escape(&decoded))
        } else {
            let cmd = format!("AT+CUSD=1,\"{code}\",15");
            let resp = at
                .command_with_timeout(&cmd, Duration::from_secs(30))
                .await
                .ok()?;
            self.set_status("Ready.");
            Some(resp)
        }
    }

    /// Query the account balance via USSD, if configured. `None` if
    /// unconfigured, the USSD query failed, or the response didn't match the
    /// configured regexp.
    pub async fn request_online_balance(&self) -> Option<f64> {
        let code = self.config.ussd_account_balance.as_deref()?;
        let response = self.send_ussd(code).await?;
        let pattern = self.config.ussd_account_balance_regexp.as_deref()?;
        let re = Regex::new(pattern).ok()?;
        let captures = re.captures(&response)?;
        let raw = captures.get(1)?.as_str().replace(',', ".");
        let balance: f64 = raw.parse().ok()?;
        self.state.lock().unwrap().balance = Some(balance);
        Some(balance)
    }

    fn check_balance_thresholds(&self, balance: f64) -> Option<Health> {
        debug_assert!(self.config.account_balance_critical <= self.config.account_balance_warning);
        if balance < self.config.account_balance_critical {
            Some(Health::critical(format!(
                "account balance {balance} {} is below the critical threshold",
                self.config.currency
            )))
        } else if balance < self.config.account_balance_warning {
            Some(Health::warning(format!(
                "account balance {balance} {} is below the warning threshold",
                self.config.currency
            )))
        } else {
            None
        }
    }

    /// Run (or skip, if not yet due) a health check.
    pub async fn do_health_check(&self, force: bool) -> Health {
        let due = {
            let last = *self.last_health_check.lock().unwrap();
            match last {
                None => true,
                Some(_) if force => true,
                Some(_) if self.current_health().state != HealthState::Ok => true,
                Some(last) => {
                    (Utc::now() - last).num_seconds()
                        >= i64::try_from(self.config.health_check_interval).unwrap_or(i64::MAX)
                }
            }
        };
        if !due {
            return self.current_health();
        }
        *self.last_health_check.lock().unwrap() = Some(Utc::now());
        let health = self.really_do_health_check().await;
        self.set_health(health.clone());
        health
    }

    async fn really_do_health_check(&self) -> Health {
        if !self.is_connected() {
            return if self.config.enabled {
                Health::critical(format!("[{}] modem object is not initialized", self.identifier()))
            } else {
                Health::warning(format!("[{}] modem object is not initialized", self.identifier()))
            };
        }
        let at = self.at.lock().unwrap().clone().unwrap();

        let Ok(manufacturer) = at.command("AT+CGMI").await else {
            return Health::critical("modem did not answer AT+CGMI");
        };
        if manufacturer.trim().is_empty() {
            return Health::critical("manufacturer is unknown");
        }

        let Ok(imsi) = at.command("AT+CIMI").await else {
            return Health::critical("IMSI is not available");
        };
        if imsi.trim().is_empty() {
            return Health::critical("IMSI is not available");
        }

        let Ok(smsc) = at.command("AT+CSCA?").await else {
            return Health::critical("SMSC is not available");
        };
        if smsc.trim().is_empty() {
            return Health::critical("SMSC is not available");
        }

        if let Ok(csq) = at.command("AT+CSQ").await {
            if let Some(rssi) = parse_csq(&csq) {
                let dbm = rssi_to_dbm(rssi);
                self.state.lock().unwrap().current_signal_dbm = dbm;
                if rssi == 99 {
                    return Health::warning("signal strength unknown");
                } else if rssi <= 1 {
                    return Health::critical("signal strength is critically low");
                } else if rssi <= 5 {
                    return Health::warning("signal strength is low");
                }
            }
        }

        if self.config.ussd_account_balance.is_some()
            && self.config.ussd_account_balance_regexp.is_some()
        {
            if let Some(balance) = self.request_online_balance().await {
                if let Some(h) = self.check_balance_thresholds(balance) {
                    return h;
                }
            }
        }

        self.run_self_test_schedule().await
    }

    /// Self-test scheduling: send a loopback SMS on the configured cadence and
    /// expect it echoed back within one or two health-check windows.
    async fn run_self_test_schedule(&self) -> Health {
        let now = Utc::now();
        let interval = SelfTestInterval::parse(&self.config.sms_self_test_interval);
        let day_matches = match interval {
            Some(SelfTestInterval::Daily) => true,
            Some(SelfTestInterval::Weekly) => now.weekday() == Weekday::Mon,
            Some(SelfTestInterval::Monthly) => now.day() == 1,
            None => false,
        };

        if !day_matches {
            self.set_status("Ready.");
            return Health::ok();
        }

        let seconds_since_midnight = now.num_seconds_from_midnight();
        let interval_secs = self.config.health_check_interval;
        let has_pending = self.health_check_expected_token.lock().unwrap().is_some();

        if u64::from(seconds_since_midnight) <= interval_secs {
            self.send_test_sms().await;
        } else if has_pending && u64::from(seconds_since_midnight) <= interval_secs * 2 {
            self.send_test_sms().await;
        } else if has_pending {
            return Health::warning("failed to send test SMS to oneself");
        }

        self.set_status("Ready.");
        Health::ok()
    }

    async fn send_test_sms(&self) {
        let token = format!("health-check-{}", Uuid::new_v4());
        *self.health_check_expected_token.lock().unwrap() = Some(token.clone());
        if let Some(phone) = self.config.phone_number.clone() {
            let sms = Sms::new(None, phone.clone(), token, None, Some(phone), None, false);
            self.send_sms(&sms).await;
        }
    }

    #[must_use]
    pub fn prefixes(&self) -> Vec<String> {
        self.config.prefixes.clone()
    }

    #[must_use]
    pub fn cost(&self) -> f64 {
        self.config.costs_per_sms
    }

    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.config.phone_number.as_deref()
    }
}

/// Extract the storage index out of a `+CMTI: "SM",<index>` notification.
fn parse_cmti_index(line: &str) -> Option<u32> {
    line.split("+CMTI:").nth(1)?.rsplit(',').next()?.trim().parse().ok()
}

/// Parse a text-mode `AT+CMGR` response:
/// `+CMGR: "REC UNREAD","+15551234567",,"23/07/31,12:00:00+00"\r\n<text>\r\nOK`
fn parse_cmgr(response: &str) -> Option<(String, String, DateTime<Utc>)> {
    let header = response.lines().find(|l| l.trim_start().starts_with("+CMGR:"))?;
    let fields: Vec<&str> = header.split('"').collect();
    let sender = fields.get(3)?.to_string();
    let timestamp = fields
        .get(5)
        .and_then(|s| parse_gsm_timestamp(s))
        .unwrap_or_else(Utc::now);

    let text = response
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("+CMGR:"))
        .skip(1)
        .filter(|l| l.trim() != "OK" && !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Some((sender, text, timestamp))
}

/// Parse a GSM 07.05 timestamp (`YY/MM/DD,HH:MM:SS+ZZ`, quarter-hour offset).
fn parse_gsm_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let (datetime, _tz) = raw.split_once(['+', '-'])?;
    let (date, time) = datetime.split_once(',')?;
    let mut date_parts = date.split('/');
    let year = 2000 + date_parts.next()?.parse::<i32>().ok()?;
    let month = date_parts.next()?.parse::<u32>().ok()?;
    let day = date_parts.next()?.parse::<u32>().ok()?;
    let mut time_parts = time.split(':');
    let hour = time_parts.next()?.parse::<u32>().ok()?;
    let minute = time_parts.next()?.parse::<u32>().ok()?;
    let second = time_parts.next()?.parse::<u32>().ok()?;
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second).single()
}

fn parse_csq(response: &str) -> Option<u8> {
    let line = response.lines().find(|l| l.contains("+CSQ:"))?;
    let rest = line.split("+CSQ:").nth(1)?;
    let rssi_str = rest.split(',').next()?.trim();
    rssi_str.parse().ok()
}

fn decode_ucs2_response(response: &str) -> Option<String> {
    let payload = response
        .split(',')
        .nth(1)
        .unwrap_or(response)
        .trim()
        .trim_matches('"');
    let bytes: Vec<u8> = (0..payload.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(payload.get(i..i + 2)?, 16).ok())
        .collect();
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// Replace the GSM 7-bit extended Euro escape sequence (ESC + 'e') with the
/// literal `€` character, as produced by some modems' UCS2 USSD decoding.
fn fix_euro_escape(text: &str) -> String {
    text.replace("\u{1b}e", "€")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rssi_table_boundaries() {
        assert_eq!(rssi_to_dbm(2), -109);
        assert_eq!(rssi_to_dbm(30), -53);
        assert_eq!(rssi_to_dbm(31), -51);
        assert_eq!(rssi_to_dbm(98), -51);
        assert_eq!(rssi_to_dbm(0), -113);
        assert_eq!(rssi_to_dbm(1), -113);
        assert_eq!(rssi_to_dbm(99), -113);
    }

    #[test]
    fn parse_csq_extracts_rssi() {
        assert_eq!(parse_csq("+CSQ: 15,99\r\nOK"), Some(15));
    }

    #[test]
    fn parse_csq_none_when_absent() {
        assert_eq!(parse_csq("OK"), None);
    }

    #[test]
    fn decode_ucs2_round_trips_ascii() {
        // "OK" as UTF-16BE hex: 0x004F, 0x004B
        let resp = "+CUSD: 0,\"004F004B\",15";
        assert_eq!(decode_ucs2_response(resp).as_deref(), Some("OK"));
    }

    #[test]
    fn parse_cmti_extracts_index() {
        assert_eq!(parse_cmti_index("+CMTI: \"SM\",7"), Some(7));
        assert_eq!(parse_cmti_index("+CSQ: 15,99"), None);
    }

    #[test]
    fn parse_cmgr_extracts_sender_text_and_timestamp() {
        let resp = "+CMGR: \"REC UNREAD\",\"+15551234567\",,\"23/07/31,12:00:00+00\"\r\nhello there\r\nOK";
        let (sender, text, timestamp) = parse_cmgr(resp).unwrap();
        assert_eq!(sender, "+15551234567");
        assert_eq!(text, "hello there");
        assert_eq!(timestamp.to_rfc3339(), "2023-07-31T12:00:00+00:00");
    }

    #[test]
    fn parse_cmgr_none_without_header() {
        assert!(parse_cmgr("OK").is_none());
    }

    #[test]
    fn fix_euro_escape_replaces_escape_sequence_only() {
        assert_eq!(fix_euro_escape("cost: 5\u{1b}e"), "cost: 5€");
        assert_eq!(fix_euro_escape("definitely not escaped"), "definitely not escaped");
    }
}
