//! Per-job progress registry.
//!
//! Each job gets a channel on first publish or subscribe. The channel keeps
//! the ordered event log so late subscribers can replay it, and fans live
//! events out through a bounded `tokio::sync::broadcast` channel. Entries
//! are removed by [`ProgressBus::collect_garbage`] once the job is terminal
//! (or closed), nobody listens, and the grace period has passed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;

use super::job_progress::ProgressEvent;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscriber fell behind by this many events and was disconnected.
    #[error("Subscriber lagged behind by {0} events")]
    Lagged(u64),

    #[error("Progress channel closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Live events buffered per subscriber before it is disconnected.
    pub subscriber_buffer: usize,
    /// How long a terminal job's log outlives its last subscriber.
    pub grace_period: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            grace_period: Duration::from_secs(60),
        }
    }
}

struct JobChannel {
    log: Vec<ProgressEvent>,
    /// `None` once the channel was closed.
    sender: Option<broadcast::Sender<ProgressEvent>>,
    /// Log position of the latest `progress` event per (paragraph, segment).
    published: HashMap<(usize, usize), usize>,
    last_total: Option<u64>,
    finished_at: Option<Instant>,
}

impl JobChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            log: Vec::new(),
            sender: Some(sender),
            published: HashMap::new(),
            last_total: None,
            finished_at: None,
        }
    }

    fn receiver_count(&self) -> usize {
        self.sender.as_ref().map(|s| s.receiver_count()).unwrap_or(0)
    }

    /// Whether `event` repeats what the log already says.
    fn is_duplicate(&self, event: &ProgressEvent) -> bool {
        match event {
            ProgressEvent::Start { total, .. } => self.last_total == Some(*total),
            ProgressEvent::Progress { .. } => event
                .segment_key()
                .and_then(|key| self.published.get(&key))
                .map(|&pos| self.log[pos] == *event)
                .unwrap_or(false),
            _ => false,
        }
    }
}

struct BusInner {
    channels: Mutex<HashMap<String, JobChannel>>,
    settings: BusSettings,
}

/// Registry of per-job progress channels. Cloning shares the registry.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl ProgressBus {
    pub fn new(settings: BusSettings) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: Mutex::new(HashMap::new()),
                settings,
            }),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, JobChannel>> {
        // A panic while holding the lock leaves only cached events behind.
        self.inner
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends `event` to the job's log and forwards it to live subscribers.
    /// Never blocks. Returns false when the event was suppressed as a
    /// duplicate or the channel is closed.
    pub fn publish(&self, job_id: &str, event: ProgressEvent) -> bool {
        let capacity = self.inner.settings.subscriber_buffer;
        let mut channels = self.channels();
        let channel = channels
            .entry(job_id.to_string())
            .or_insert_with(|| JobChannel::new(capacity));

        let Some(sender) = channel.sender.as_ref() else {
            return false;
        };
        if channel.is_duplicate(&event) {
            log::debug!("Suppressed repeated {} event for {}", event.kind(), job_id);
            return false;
        }

        // No receivers is fine; the log still records the event.
        let _ = sender.send(event.clone());

        match &event {
            ProgressEvent::Start { total, .. } => channel.last_total = Some(*total),
            ProgressEvent::Progress { .. } => {
                if let Some(key) = event.segment_key() {
                    channel.published.insert(key, channel.log.len());
                }
            }
            _ => channel.finished_at = Some(Instant::now()),
        }
        channel.log.push(event);
        true
    }

    /// Subscribes to a job. The backlog snapshot and the live receiver are
    /// taken under one lock: every event is in exactly one of them.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let capacity = self.inner.settings.subscriber_buffer;
        let mut channels = self.channels();
        let channel = channels
            .entry(job_id.to_string())
            .or_insert_with(|| JobChannel::new(capacity));

        Subscription {
            job_id: job_id.to_string(),
            backlog: channel.log.clone(),
            receiver: channel.sender.as_ref().map(|s| s.subscribe()),
        }
    }

    /// Drops the job's channel. Live subscribers observe `Closed` and later
    /// publishes are ignored until the tombstone is collected.
    pub fn close(&self, job_id: &str) {
        let mut channels = self.channels();
        if let Some(channel) = channels.get_mut(job_id) {
            channel.sender = None;
            channel.finished_at = Some(Instant::now());
        } else {
            let mut tombstone = JobChannel::new(1);
            tombstone.sender = None;
            tombstone.finished_at = Some(Instant::now());
            channels.insert(job_id.to_string(), tombstone);
        }
    }

    /// Starts the grace period of a job known to be finished. The channel
    /// stays open; a later terminal publish restarts the clock.
    pub fn mark_finished(&self, job_id: &str) {
        if let Some(channel) = self.channels().get_mut(job_id) {
            channel.finished_at.get_or_insert_with(Instant::now);
        }
    }

    /// Removes finished channels without subscribers whose grace period
    /// passed. Returns the number removed.
    pub fn collect_garbage(&self) -> usize {
        let grace = self.inner.settings.grace_period;
        let now = Instant::now();
        let mut channels = self.channels();
        let before = channels.len();
        channels.retain(|_, channel| {
            let expired = channel
                .finished_at
                .map(|at| now.duration_since(at) >= grace)
                .unwrap_or(false);
            !(expired && channel.receiver_count() == 0)
        });
        before - channels.len()
    }

    /// Runs [`collect_garbage`](Self::collect_garbage) every `interval`
    /// until `shutdown` resolves.
    pub async fn run_gc(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.collect_garbage();
                    if removed > 0 {
                        log::debug!("Collected {} progress channels", removed);
                    }
                }
                _ = &mut shutdown => break,
            }
        }
    }

    pub fn backlog(&self, job_id: &str) -> Vec<ProgressEvent> {
        self.channels()
            .get(job_id)
            .map(|c| c.log.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.channels()
            .get(job_id)
            .map(|c| c.receiver_count())
            .unwrap_or(0)
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(BusSettings::default())
    }
}

/// A subscriber's view of one job: replay `backlog`, then `recv` live
/// events. Dropping the subscription unregisters it.
pub struct Subscription {
    job_id: String,
    backlog: Vec<ProgressEvent>,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn backlog(&self) -> &[ProgressEvent] {
        &self.backlog
    }

    pub fn take_backlog(&mut self) -> Vec<ProgressEvent> {
        std::mem::take(&mut self.backlog)
    }

    /// Waits for the next live event. After `Lagged` or `Closed` the
    /// subscription is disconnected and keeps returning `Closed`.
    pub async fn recv(&mut self) -> Result<ProgressEvent, SubscriptionError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(SubscriptionError::Closed);
        };
        match receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!(
                    "Subscriber of {} lagged by {} events, disconnecting",
                    self.job_id,
                    skipped
                );
                self.receiver = None;
                Err(SubscriptionError::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.receiver = None;
                Err(SubscriptionError::Closed)
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `Ok(None)` when no
    /// event is ready.
    pub fn try_recv(&mut self) -> Result<Option<ProgressEvent>, SubscriptionError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(SubscriptionError::Closed);
        };
        match receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                self.receiver = None;
                Err(SubscriptionError::Lagged(skipped))
            }
            Err(broadcast::error::TryRecvError::Closed) => {
                self.receiver = None;
                Err(SubscriptionError::Closed)
            }
        }
    }

    /// Unregisters the subscriber.
    pub fn unsubscribe(mut self) {
        self.receiver = None;
    }

    pub fn is_connected(&self) -> bool {
        self.receiver.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{ParagraphOutline, Segment};

    fn bus(buffer: usize, grace: Duration) -> ProgressBus {
        ProgressBus::new(BusSettings {
            subscriber_buffer: buffer,
            grace_period: grace,
        })
    }

    fn progress(s: usize, text: &str) -> ProgressEvent {
        ProgressEvent::progress(
            s as u64 + 1,
            2,
            &Segment {
                paragraph_index: 0,
                segment_index: s,
                text: text.to_string(),
                pinyin: String::new(),
                english: String::new(),
            },
        )
    }

    fn start(total: u64) -> ProgressEvent {
        ProgressEvent::start(
            "t1",
            total,
            &[ParagraphOutline {
                indent: String::new(),
                separator: String::new(),
                segment_count: total as usize,
            }],
        )
    }

    #[tokio::test]
    async fn test_backlog_then_live_without_gaps() {
        let bus = ProgressBus::default();
        bus.publish("t1", start(2));
        bus.publish("t1", progress(0, "你好"));

        let mut sub = bus.subscribe("t1");
        assert_eq!(sub.backlog().len(), 2);

        bus.publish("t1", progress(1, "，世界。"));
        let live = sub.recv().await.unwrap();
        assert_eq!(live, progress(1, "，世界。"));
        assert_eq!(sub.try_recv().unwrap(), None);
    }

    #[test]
    fn test_duplicates_are_suppressed() {
        let bus = ProgressBus::default();
        assert!(bus.publish("t1", start(2)));
        assert!(bus.publish("t1", progress(0, "你好")));
        assert!(!bus.publish("t1", start(2)));
        assert!(!bus.publish("t1", progress(0, "你好")));
        // Same key with a different payload is a correction, not a repeat.
        assert!(bus.publish("t1", progress(0, "您好")));
        assert!(bus.publish("t1", start(3)));
        assert_eq!(bus.backlog("t1").len(), 4);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_disconnected() {
        let bus = bus(2, Duration::from_secs(60));
        let mut sub = bus.subscribe("t1");
        for i in 0..5 {
            bus.publish("t1", progress(i, "字"));
        }
        assert!(matches!(sub.recv().await, Err(SubscriptionError::Lagged(_))));
        assert!(!sub.is_connected());
        assert_eq!(sub.recv().await, Err(SubscriptionError::Closed));
        assert_eq!(bus.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn test_close_disconnects_and_ignores_late_publish() {
        let bus = ProgressBus::default();
        let mut sub = bus.subscribe("t1");
        bus.close("t1");
        assert_eq!(sub.recv().await, Err(SubscriptionError::Closed));
        assert!(!bus.publish("t1", progress(0, "你好")));
    }

    #[test]
    fn test_unsubscribe_and_drop_unregister() {
        let bus = ProgressBus::default();
        let first = bus.subscribe("t1");
        let second = bus.subscribe("t1");
        assert_eq!(bus.subscriber_count("t1"), 2);
        first.unsubscribe();
        assert_eq!(bus.subscriber_count("t1"), 1);
        drop(second);
        assert_eq!(bus.subscriber_count("t1"), 0);
    }

    #[test]
    fn test_gc_keeps_hot_and_watched_channels() {
        let bus = bus(16, Duration::ZERO);
        bus.publish("hot", start(1));
        bus.publish("done", ProgressEvent::error("boom"));
        bus.publish("watched", ProgressEvent::error("boom"));
        let _sub = bus.subscribe("watched");

        assert_eq!(bus.collect_garbage(), 1);
        assert_eq!(bus.len(), 2);
        assert!(bus.backlog("done").is_empty());
        assert_eq!(bus.backlog("hot").len(), 1);
    }

    #[test]
    fn test_mark_finished_makes_idle_channel_collectable() {
        let bus = bus(16, Duration::ZERO);
        drop(bus.subscribe("t1"));
        bus.mark_finished("ghost");
        assert_eq!(bus.collect_garbage(), 0);
        assert_eq!(bus.len(), 1);

        bus.mark_finished("t1");
        assert!(bus.publish("t1", ProgressEvent::error("boom")));
        assert_eq!(bus.collect_garbage(), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_gc_respects_grace_period() {
        let bus = bus(16, Duration::from_secs(3600));
        bus.publish("done", ProgressEvent::error("boom"));
        assert_eq!(bus.collect_garbage(), 0);
        assert_eq!(bus.backlog("done").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gc_stops_on_shutdown() {
        let bus = bus(16, Duration::ZERO);
        bus.publish("done", ProgressEvent::error("boom"));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let gc = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.run_gc(Duration::from_secs(1), async {
                    let _ = rx.await;
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(bus.is_empty());
        tx.send(()).unwrap();
        gc.await.unwrap();
    }
}
