//! `ModemPool`: aggregates workers by identifier, routes outgoing SMS, and
//! buffers incoming SMS for later RPC retrieval.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};

use crate::gateway::EventSignal;
use crate::health::{highest, Health};
use crate::modem::ModemWorker;
use crate::modemconfig::ModemConfig;
use crate::router::SmsRouter;
use crate::serialportmapper::SerialPortMapper;
use crate::sms::Sms;

/// Buffered inbound message, tagged with the time it entered the buffer so
/// stale entries can be swept.
struct Buffered {
    sms: Sms,
    buffered_at: chrono::DateTime<Utc>,
}

/// Maximum age a buffered inbound SMS may reach before `cleanup` drops it.
const BUFFER_MAX_AGE_SECONDS: i64 = 60;

pub struct ModemPool {
    workers: Vec<Arc<ModemWorker>>,
    by_identifier: HashMap<String, Arc<ModemWorker>>,
    router: std::sync::Mutex<SmsRouter>,
    buffer: std::sync::Mutex<HashMap<String, Vec<Buffered>>>,
    /// Outbound SMS awaiting dispatch — `send_sms` only pushes here and
    /// returns; `process_outgoing` is what actually talks to a modem.
    outbound: std::sync::Mutex<VecDeque<Sms>>,
    /// `sms_id -> identifier` for every SMS accepted for sending, so
    /// `get_delivery_status` can resolve the owning modem without the caller
    /// having to know it. Entries are dropped once `forget` confirms delivery.
    sent_index: std::sync::Mutex<HashMap<String, String>>,
    /// Raised after every enqueue so the gateway event loop wakes up and
    /// drains the outbound queue without waiting out the health-check
    /// interval. Set once, after construction, by `Gateway::new`.
    events: std::sync::Mutex<Option<Arc<EventSignal>>>,
}

impl ModemPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            by_identifier: HashMap::new(),
            router: std::sync::Mutex::new(SmsRouter::new()),
            buffer: std::sync::Mutex::new(HashMap::new()),
            outbound: std::sync::Mutex::new(VecDeque::new()),
            sent_index: std::sync::Mutex::new(HashMap::new()),
            events: std::sync::Mutex::new(None),
        }
    }

    /// Wire in the event signal the gateway's main loop waits on. Called once
    /// by `Gateway::new`.
    pub fn set_event_signal(&self, events: Arc<EventSignal>) {
        *self.events.lock().unwrap() = Some(events);
    }

    /// Construct and register one modem worker. Does not initialize it — call
    /// `init_all` (or a per-worker `init()`) separately so callers can retry.
    pub fn add_modem(&mut self, config: ModemConfig, port_mapper: Arc<SerialPortMapper>) {
        let identifier = config.identifier.clone();
        let prefixes = config.prefixes.clone();
        let cost = config.costs_per_sms;

        let worker = Arc::new(ModemWorker::new(config, port_mapper));
        self.router
            .lock()
            .unwrap()
            .add(identifier.clone(), &prefixes, cost, worker.health_handle());
        self.by_identifier.insert(identifier, worker.clone());
        self.workers.push(worker);
    }

    #[must_use]
    pub fn workers(&self) -> &[Arc<ModemWorker>] {
        &self.workers
    }

    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Arc<ModemWorker>> {
        self.by_identifier.get(identifier).cloned()
    }

    fn find_by_phone_number(&self, phone_number: &str) -> Option<Arc<ModemWorker>> {
        self.workers
            .iter()
            .find(|w| w.phone_number() == Some(phone_number))
            .cloned()
    }

    /// Resolve a target modem for an outbound SMS: prefer the sender's own
    /// registered phone number (if healthy), otherwise fall back to the
    /// router's prefix match against the recipient.
    #[must_use]
    pub fn resolve_outgoing(&self, sender: Option<&str>, recipient: &str) -> Option<Arc<ModemWorker>> {
        if let Some(sender) = sender {
            if let Some(worker) = self.find_by_phone_number(sender) {
                if worker.current_health().state == crate::health::HealthState::Ok {
                    return Some(worker);
                }
            }
        }
        let identifier = self.router.lock().unwrap().get(recipient)?;
        self.get(&identifier)
    }

    /// Enqueue an SMS for delivery and return its id immediately. Does not
    /// perform any routing — the event loop drains the queue separately via
    /// `process_outgoing`, so a caller (the RPC handler) never blocks on an
    /// AT command round trip.
    pub fn send_sms(&self, sms: Sms) -> String {
        let id = sms.id.clone();
        self.outbound.lock().unwrap().push_back(sms);
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            events.notify_one();
        }
        id
    }

    /// Drain the outbound queue: route and dispatch every SMS queued by
    /// `send_sms`. Unroutable messages are dropped with a logged error —
    /// retry/backpressure is the caller's concern.
    pub async fn process_outgoing(&self) {
        loop {
            let Some(sms) = self.outbound.lock().unwrap().pop_front() else {
                break;
            };
            let Some(worker) = self.resolve_outgoing(sms.sender.as_deref(), &sms.recipient) else {
                error!(sms_id = %sms.id, recipient = %sms.recipient, "no modem available to route outgoing SMS");
                continue;
            };
            if worker.send_sms(&sms).await {
                self.sent_index
                    .lock()
                    .unwrap()
                    .insert(sms.id.clone(), worker.identifier().to_string());
            } else {
                warn!(sms_id = %sms.id, modem = %worker.identifier(), "failed to dispatch outgoing SMS");
            }
        }
    }

    /// Poll workers in registration order and return the first available
    /// inbound message, buffering it for later RPC retrieval.
    pub fn get_incoming_sms(&self) -> Option<Sms> {
        for worker in &self.workers {
            if let Some(sms) = worker.take_sms() {
                self.buffer
                    .lock()
                    .unwrap()
                    .entry(worker.identifier().to_string())
                    .or_default()
                    .push(Buffered {
                        sms: sms.clone(),
                        buffered_at: Utc::now(),
                    });
                return Some(sms);
            }
        }
        None
    }

    /// Drop buffered messages older than `BUFFER_MAX_AGE_SECONDS`, and sweep
    /// `sent_index` for ids whose delivery the owning worker has confirmed.
    pub fn cleanup(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        for entries in buffer.values_mut() {
            entries.retain(|b| (Utc::now() - b.buffered_at).num_seconds() < BUFFER_MAX_AGE_SECONDS);
        }
        drop(buffer);

        let mut sent_index = self.sent_index.lock().unwrap();
        let forgotten: Vec<String> = sent_index
            .iter()
            .filter(|(sms_id, identifier)| {
                self.get(identifier).is_some_and(|w| w.forget(sms_id))
            })
            .map(|(sms_id, _)| sms_id.clone())
            .collect();
        for sms_id in forgotten {
            sent_index.remove(&sms_id);
        }
    }

    /// All currently-buffered inbound messages, across every modem, as a flat
    /// list — the original's per-modem dict flattened at this layer rather
    /// than at the RPC boundary.
    #[must_use]
    pub fn get_buffered_sms(&self) -> Vec<Sms> {
        self.buffer
            .lock()
            .unwrap()
            .values()
            .flat_map(|entries| entries.iter().map(|b| b.sms.clone()))
            .collect()
    }

    /// Resolve the owning modem via `sent_index` and report whether `sms_id`
    /// has been delivered. `None` if the id is unknown (never sent, or
    /// already forgotten).
    #[must_use]
    pub fn get_delivery_status(&self, sms_id: &str) -> Option<bool> {
        let identifier = self.sent_index.lock().unwrap().get(sms_id).cloned()?;
        self.get(&identifier).map(|w| w.get_delivery_status(sms_id))
    }

    /// Worst-wins health aggregation across every registered modem. An empty
    /// pool is CRITICAL — there is nothing to serve outbound SMS with.
    #[must_use]
    pub fn health(&self) -> Health {
        if self.workers.is_empty() {
            return Health::critical("no modems are registered in the pool");
        }
        let readings: Vec<Health> = self.workers.iter().map(|w| w.current_health()).collect();
        highest(&readings)
    }

    /// Run a health check on every worker, returning the aggregated result.
    pub async fn do_health_check(&self, force: bool) -> Health {
        for worker in &self.workers {
            worker.do_health_check(force).await;
        }
        self.health()
    }

    /// Per-modem stats, as served by the `get_stats` RPC method.
    #[must_use]
    pub fn get_stats(&self) -> HashMap<String, serde_json::Value> {
        self.workers
            .iter()
            .map(|w| {
                let state = w.snapshot();
                let health = w.current_health();
                let value = serde_json::json!({
                    "phone_number": w.phone_number(),
                    "network": state.current_network,
                    "signal_dbm": state.current_signal_dbm,
                    "port": state.port,
                    "status": state.status,
                    "balance": state.balance,
                    "currency": state.currency,
                    "init_counter": state.init_counter,
                    "last_init": state.last_init,
                    "last_received": state.last_received,
                    "last_sent": state.last_sent,
                    "sent": state.sent,
                    "received": state.received,
                    "health_state": health.state.to_string(),
                    "health_message": health.message,
                });
                (w.identifier().to_string(), value)
            })
            .collect()
    }

    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.identifier().to_string()).collect()
    }
}

impl Default for ModemPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize every registered worker, retrying a handful of times with a
/// fixed delay — a modem that never comes up stays registered (so health
/// checks can keep reporting it CRITICAL) rather than being dropped.
pub async fn init_pool(pool: &ModemPool, retries: u32, retry_delay: std::time::Duration) {
    for worker in pool.workers() {
        let mut ok = false;
        for attempt in 1..=retries.max(1) {
            if worker.init().await {
                ok = true;
                break;
            }
            warn!(
                modem = %worker.identifier(),
                attempt,
                "modem failed to initialize, retrying"
            );
            tokio::time::sleep(retry_delay).await;
        }
        if !ok {
            error!(modem = %worker.identifier(), "modem never initialized after retries; leaving it registered as unhealthy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modemconfig::ModemConfig;

    fn config(identifier: &str, prefixes: &[&str], cost: f64, phone: &str) -> ModemConfig {
        ModemConfig {
            identifier: identifier.to_string(),
            enabled: true,
            baud: 115_200,
            port: "/dev/ttyUSB0".to_string(),
            pin: None,
            wait_for_start: 1,
            wait_for_delivery: false,
            phone_number: Some(phone.to_string()),
            ussd_account_balance: None,
            ussd_account_balance_regexp: None,
            currency: "EUR".to_string(),
            account_balance_warning: 5.0,
            account_balance_critical: 1.0,
            prefixes: prefixes.iter().map(|s| (*s).to_string()).collect(),
            costs_per_sms: cost,
            health_check_interval: 600,
            sms_self_test_interval: "daily".to_string(),
            imei: None,
            encoding: "GSM".to_string(),
            email_address: None,
        }
    }

    fn mapper() -> Arc<SerialPortMapper> {
        Arc::new(SerialPortMapper::new("/tmp/does-not-exist-smsgated-test"))
    }

    #[test]
    fn empty_pool_is_critical() {
        let pool = ModemPool::new();
        assert_eq!(pool.health().state, crate::health::HealthState::Critical);
    }

    #[test]
    fn resolve_outgoing_prefers_sender_phone_number() {
        let mut pool = ModemPool::new();
        pool.add_modem(config("a", &["+1"], 0.05, "+15550000001"), mapper());
        pool.add_modem(config("b", &["+1"], 0.01, "+15550000002"), mapper());
        for worker in pool.workers() {
            *worker.health_handle().lock().unwrap() = Health::ok();
        }

        let resolved = pool.resolve_outgoing(Some("+15550000001"), "+15559999999");
        assert_eq!(resolved.unwrap().identifier(), "a");
    }

    #[test]
    fn resolve_outgoing_falls_back_to_router_prefix() {
        let mut pool = ModemPool::new();
        pool.add_modem(config("a", &["+1"], 0.05, "+15550000001"), mapper());
        for worker in pool.workers() {
            *worker.health_handle().lock().unwrap() = Health::ok();
        }

        let resolved = pool.resolve_outgoing(None, "+15559999999");
        assert_eq!(resolved.unwrap().identifier(), "a");
    }

    #[test]
    fn send_sms_enqueues_and_returns_immediately() {
        let mut pool = ModemPool::new();
        pool.add_modem(config("a", &["+1"], 0.05, "+15550000001"), mapper());
        let sms = Sms::new(None, "+15559999999".to_string(), "hi".to_string(), None, None, None, false);
        let id = pool.send_sms(sms);
        assert!(!id.is_empty());
        // Not dispatched yet — process_outgoing hasn't run — so no modem owns it.
        assert_eq!(pool.get_delivery_status(&id), None);
    }

    #[test]
    fn get_buffered_sms_is_empty_initially() {
        let mut pool = ModemPool::new();
        pool.add_modem(config("a", &["+1"], 0.05, "+15550000001"), mapper());
        assert!(pool.get_buffered_sms().is_empty());
    }
}
