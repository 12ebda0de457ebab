use crate::models::ProgressEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// How long a finished plan's last event stays around for late subscribers.
const FINISHED_RETENTION: Duration = Duration::from_secs(300);

struct Topic {
    sender: broadcast::Sender<ProgressEvent>,
    last: Option<ProgressEvent>,
    finished_at: Option<Instant>,
}

impl Topic {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            last: None,
            finished_at: None,
        }
    }

    fn is_stale(&self, now: Instant, retention: Duration) -> bool {
        if self.sender.receiver_count() > 0 {
            return false;
        }
        match self.finished_at {
            Some(at) => now.duration_since(at) >= retention,
            None => self.last.is_none(),
        }
    }
}

/// One broadcast topic per plan id.
///
/// Events of one plan are published by the single job running that plan's
/// chain, so subscribers see them in stage order. The latest event is kept
/// for subscribers that join mid-run. A topic is dropped once its plan has
/// finished, nobody listens and the retention window has passed.
#[derive(Clone)]
pub struct ProgressBus {
    topics: Arc<Mutex<HashMap<i64, Topic>>>,
    retention: Duration,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::with_retention(FINISHED_RETENTION)
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            topics: Arc::default(),
            retention,
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<i64, Topic>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prune(&self, topics: &mut HashMap<i64, Topic>, keep: i64) {
        let now = Instant::now();
        topics.retain(|id, topic| *id == keep || !topic.is_stale(now, self.retention));
    }

    pub fn publish(&self, plan_id: i64, event: ProgressEvent) {
        let mut topics = self.topics();
        self.prune(&mut topics, plan_id);
        let topic = topics.entry(plan_id).or_insert_with(Topic::new);
        topic.finished_at = event.is_terminal().then(Instant::now);
        topic.last = Some(event.clone());
        // No subscribers is fine
        let _ = topic.sender.send(event);
    }

    /// The latest event (if any) and a receiver for everything after it.
    pub fn subscribe(
        &self,
        plan_id: i64,
    ) -> (Option<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        let mut topics = self.topics();
        self.prune(&mut topics, plan_id);
        let topic = topics.entry(plan_id).or_insert_with(Topic::new);
        (topic.last.clone(), topic.sender.subscribe())
    }

    #[cfg(test)]
    fn topic_count(&self) -> usize {
        self.topics().len()
    }
}
