//! Send-and-wait engine: send once, then poll at a fixed cadence until a reply matches or the
//! deadline passes.
//!
//! One engine per channel instance. Waits are cooperative tasks; any number can run at once,
//! but concurrent waits on one channel share its cursor and may take each other's replies.

use crate::channels::{Channel, InboundMessage, SentMessage};
use crate::correlate;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Delay between polls. Fixed; not configurable.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default wait for a reply, in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 180.0;

/// One send-with-reply call.
#[derive(Debug, Clone)]
pub struct WaitRequest {
    pub message: String,
    pub target: String,
    pub wait_for_reply: bool,
    /// Seconds. Zero, negative or NaN resolve to a timeout without polling; +inf waits forever.
    pub timeout_seconds: f64,
}

impl WaitRequest {
    pub fn fire_and_forget(message: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            target: target.into(),
            wait_for_reply: false,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_reply(
        message: impl Into<String>,
        target: impl Into<String>,
        timeout_seconds: f64,
    ) -> Self {
        Self {
            message: message.into(),
            target: target.into(),
            wait_for_reply: true,
            timeout_seconds,
        }
    }
}

/// Terminal result of one wait. Exactly one per call.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// Credentials or identity missing; nothing was sent.
    NotConfigured { reason: String },
    /// Sent; no wait was requested.
    Sent(SentMessage),
    ReplyReceived {
        sent: SentMessage,
        reply: InboundMessage,
        /// The reply threads onto the sent message. Informational only.
        direct_reply: bool,
        wait_duration: Duration,
    },
    /// Deadline passed with no match. Persistent poll failures end here too.
    TimedOut { sent: SentMessage, waited_seconds: f64 },
    SendFailed { reason: String },
    /// Sent, then the wait broke for a reason other than a transient poll failure.
    PollError { sent: SentMessage, reason: String },
}

/// Decrements the active-wait counter when the wait ends, however it ends.
struct ActiveWait(Arc<AtomicUsize>);

impl ActiveWait {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveWait {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives one channel through send, optional wait, and reply correlation.
#[derive(Clone)]
pub struct WaitEngine {
    channel: Arc<dyn Channel>,
    active: Arc<AtomicUsize>,
}

impl WaitEngine {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Waits currently polling on this channel.
    pub fn active_waits(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn run(&self, req: &WaitRequest) -> WaitOutcome {
        let id = self.channel.id();
        if let Err(e) = self.channel.check_configured() {
            log::warn!("{}: {}", id, e);
            return WaitOutcome::NotConfigured {
                reason: e.to_string(),
            };
        }
        let sent = match self.channel.send(&req.message, &req.target).await {
            Ok(sent) => sent,
            Err(e) => {
                log::error!("{}: send failed: {}", id, e);
                return WaitOutcome::SendFailed {
                    reason: e.to_string(),
                };
            }
        };
        log::info!("{}: message sent to {}", id, sent.target);
        if !req.wait_for_reply {
            return WaitOutcome::Sent(sent);
        }
        let _active = ActiveWait::enter(&self.active);
        self.wait_for_reply(sent, req.timeout_seconds).await
    }

    async fn wait_for_reply(&self, sent: SentMessage, timeout_seconds: f64) -> WaitOutcome {
        let id = self.channel.id();
        let store = self.channel.cursor_store();
        let start = Instant::now();
        let deadline = deadline_after(start, timeout_seconds);
        let timed_out = |sent: SentMessage| {
            log::info!("{}: no reply within {}s", id, timeout_seconds.max(0.0));
            WaitOutcome::TimedOut {
                sent,
                waited_seconds: timeout_seconds.max(0.0),
            }
        };

        if is_past(deadline) {
            return timed_out(sent);
        }
        match bounded(deadline, self.channel.prepare_wait()).await {
            None => return timed_out(sent),
            Some(Err(e)) => {
                log::error!("{}: failed to initialize polling: {}", id, e);
                return WaitOutcome::PollError {
                    sent,
                    reason: format!("failed to initialize polling: {}", e),
                };
            }
            Some(Ok(())) => {}
        }
        log::info!(
            "{}: waiting for reply from {} (timeout {}s)",
            id,
            sent.target,
            timeout_seconds
        );

        loop {
            if is_past(deadline) {
                return timed_out(sent);
            }
            match bounded(deadline, self.channel.poll_since(store.current())).await {
                None => continue,
                Some(Err(e)) if e.is_transport() => {
                    log::warn!("{}: poll failed, retrying: {}", id, e);
                }
                Some(Err(e)) => {
                    log::error!("{}: polling aborted: {}", id, e);
                    return WaitOutcome::PollError {
                        sent,
                        reason: e.to_string(),
                    };
                }
                Some(Ok(batch)) => {
                    let next_cursor = batch.next_cursor;
                    let matched = batch
                        .messages
                        .into_iter()
                        .find(|m| correlate::is_reply(m, &sent, &sent.target));
                    if let Some(reply) = matched {
                        // Later messages in the batch stay unconsumed.
                        store.advance(reply.position);
                        let direct_reply = correlate::is_direct_reply(&reply, &sent);
                        let wait_duration = start.elapsed();
                        log::info!(
                            "{}: reply from {} after {:.1}s",
                            id,
                            reply.sender,
                            wait_duration.as_secs_f64()
                        );
                        return WaitOutcome::ReplyReceived {
                            sent,
                            reply,
                            direct_reply,
                            wait_duration,
                        };
                    }
                    store.advance(next_cursor);
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// None means no deadline.
fn deadline_after(start: Instant, timeout_seconds: f64) -> Option<Instant> {
    if timeout_seconds.is_nan() || timeout_seconds <= 0.0 {
        return Some(start);
    }
    Duration::try_from_secs_f64(timeout_seconds)
        .ok()
        .and_then(|d| start.checked_add(d))
}

fn is_past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Run `fut` until the deadline. None when the deadline cut it off.
async fn bounded<T>(deadline: Option<Instant>, fut: impl Future<Output = T>) -> Option<T> {
    match deadline {
        Some(d) => tokio::time::timeout_at(d, fut).await.ok(),
        None => Some(fut.await),
    }
}
