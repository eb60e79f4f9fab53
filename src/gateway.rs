//! `Gateway`: wires the modem pool, mail relay and RPC endpoint together and
//! runs the main event loop. This is the spec's "Supervisor" component,
//! renamed to avoid clashing with this binary's process-crash-restart
//! `supervisor` module.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::pool::ModemPool;
use crate::smtp::{MailRelay, DELIVERY_RETRY_BACKOFF};
use crate::sms::Sms;

/// A level-triggered wakeup signal: `notify()` sets a pending bit and wakes
/// one waiter; `wait()` clears the bit and returns immediately if it was
/// already set. This avoids the classic lost-wakeup race a bare
/// `tokio::sync::Notify` has between "event raised" and "task calls wait" —
/// the pending bit makes a notification that arrives before anyone is
/// waiting still observed on the next `wait()` call.
pub struct EventSignal {
    notify: Notify,
    pending: AtomicBool,
}

impl EventSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            pending: AtomicBool::new(false),
        }
    }

    pub fn notify_one(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Wait for a notification, or until `timeout` elapses. Returns `true` if
    /// woken by a notification, `false` on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.pending.swap(false, Ordering::SeqCst) {
            return true;
        }
        let woke = tokio::time::timeout(timeout, self.notify.notified()).await.is_ok();
        if woke {
            self.pending.store(false, Ordering::SeqCst);
        }
        woke
    }
}

impl Default for EventSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Gateway {
    pool: Arc<ModemPool>,
    mail: Arc<MailRelay>,
    events: Arc<EventSignal>,
    health_check_interval: Duration,
    smtp_delivery_tx: mpsc::UnboundedSender<Sms>,
    smtp_delivery_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Sms>>>,
}

impl Gateway {
    #[must_use]
    pub fn new(pool: Arc<ModemPool>, mail: Arc<MailRelay>, health_check_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventSignal::new());
        pool.set_event_signal(events.clone());
        Self {
            pool,
            mail,
            events,
            health_check_interval,
            smtp_delivery_tx: tx,
            smtp_delivery_rx: tokio::sync::Mutex::new(Some(rx)),
        }
    }

    #[must_use]
    pub fn events(&self) -> Arc<EventSignal> {
        self.events.clone()
    }

    /// Enqueue a delivered SMS for e-mail forwarding.
    pub fn queue_for_delivery(&self, sms: Sms) {
        let _ = self.smtp_delivery_tx.send(sms);
    }

    /// Spawn the SMTP delivery-queue-draining task. Blocks up to 10s waiting
    /// for a message; on send failure, re-queues the message and backs off
    /// for 30s before the next attempt. Runs an opportunistic relay health
    /// check on every idle poll or delivery failure.
    pub fn spawn_smtp_delivery_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut rx = gateway
                .smtp_delivery_rx
                .lock()
                .await
                .take()
                .expect("smtp delivery task spawned more than once");

            loop {
                match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
                    Ok(Some(sms)) => {
                        debug!(sms_id = %sms.id, "draining SMS-to-mail delivery queue");
                        let sender_email = gateway
                            .pool
                            .workers()
                            .iter()
                            .find(|w| w.identifier() == sms.receiving_modem.as_deref().unwrap_or_default())
                            .and_then(|w| w.config.email_address.clone());

                        if let Err(e) = gateway.mail.send(&sms, sender_email.as_deref()).await {
                            warn!(sms_id = %sms.id, error = %e, "failed to deliver SMS via e-mail, re-queueing");
                            let _ = gateway.smtp_delivery_tx.send(sms);
                            gateway.mail.test_connection().await;
                            tokio::time::sleep(DELIVERY_RETRY_BACKOFF).await;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        gateway.mail.test_connection().await;
                    }
                }
            }
        })
    }

    /// Run the main event loop: wait for a notification (an SMS arrived, or
    /// the outbound queue needs flushing) bounded by the health-check
    /// interval; on wake, drain one inbound SMS (forwarding to the mail queue
    /// if present), dispatch everything in the outbound queue, and sweep
    /// stale buffered/sent-but-forgotten state; on timeout, run a pool health
    /// check instead.
    pub async fn run(self: Arc<Self>) {
        info!("gateway event loop starting");
        loop {
            let woke = self.events.wait(self.health_check_interval).await;
            if woke {
                if let Some(sms) = self.pool.get_incoming_sms() {
                    info!(sms_id = %sms.id, "received inbound SMS");
                    self.queue_for_delivery(sms);
                }
                self.pool.process_outgoing().await;
                self.pool.cleanup();
            } else {
                debug!("health-check interval elapsed, running pool health check");
                let health = self.pool.do_health_check(false).await;
                if health.state != crate::health::HealthState::Ok {
                    warn!(state = %health.state, message = ?health.message, "pool health check reported a problem");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_before_wait_is_not_lost() {
        let signal = EventSignal::new();
        signal.notify_one();
        let woke = signal.wait(Duration::from_millis(50)).await;
        assert!(woke);
    }

    #[tokio::test]
    async fn wait_times_out_without_notification() {
        let signal = EventSignal::new();
        let woke = signal.wait(Duration::from_millis(10)).await;
        assert!(!woke);
    }
}
