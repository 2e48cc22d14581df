//! Bounded-concurrency priority dispatch with in-flight request dedup
//! (S4.3). Two callers racing on the same cache key share one upstream
//! fetch instead of issuing it twice.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, Mutex, Notify};

/// One queued unit of work, ordered by priority (smaller first, S4.3/S6:
/// "numerically smaller = more urgent") then FIFO within a priority tier via
/// the monotonically increasing `seq`.
struct QueuedItem {
    priority: i32,
    seq: u64,
    key: String,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, but smaller priority is more urgent, so
        // we reverse the priority comparison to make it pop first. Within
        // equal priority, lower seq (older) should pop first, so we reverse
        // seq comparison too.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Tracks in-flight fetches so concurrent requests for the same key await a
/// single upstream call instead of duplicating it.
pub struct InFlightDedup {
    inflight: Mutex<HashMap<String, broadcast::Sender<DedupResult>>>,
}

#[derive(Clone)]
pub(crate) enum DedupResult {
    Ok(serde_json::Value),
    Err(String),
}

impl Default for InFlightDedup {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

pub enum DedupOutcome {
    /// This caller is the leader: it must perform the fetch and call
    /// [`InFlightDedup::finish`] when done.
    Leader,
    /// Another caller is already fetching this key; wait on this receiver.
    Follower(broadcast::Receiver<DedupResult>),
}

impl InFlightDedup {
    /// Join the in-flight fetch for `key`, becoming the leader if none is
    /// running.
    pub async fn join(&self, key: &str) -> DedupOutcome {
        let mut map = self.inflight.lock().await;
        if let Some(tx) = map.get(key) {
            return DedupOutcome::Follower(tx.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        map.insert(key.to_string(), tx);
        DedupOutcome::Leader
    }

    /// The leader calls this once the fetch completes, fanning the result
    /// out to every follower that joined in the meantime.
    pub async fn finish(&self, key: &str, result: Result<serde_json::Value, String>) {
        let mut map = self.inflight.lock().await;
        if let Some(tx) = map.remove(key) {
            let _ = tx.send(match result {
                Ok(v) => DedupResult::Ok(v),
                Err(e) => DedupResult::Err(e),
            });
        }
    }
}

/// Wait on a follower's broadcast channel and translate the result back
/// into a `Result`.
pub async fn await_follower(
    mut rx: broadcast::Receiver<DedupResult>,
) -> Result<serde_json::Value, String> {
    match rx.recv().await {
        Ok(DedupResult::Ok(v)) => Ok(v),
        Ok(DedupResult::Err(e)) => Err(e),
        Err(_) => Err("leader dropped without completing fetch".to_string()),
    }
}

struct DispatcherState {
    available: usize,
    heap: BinaryHeap<QueuedItem>,
}

/// Bounded worker-pool admission control (S4.3: "pulled in priority order as
/// slots free"): at most `max_concurrency` fetches run at once, and when
/// more callers are waiting than there are free slots, the next one admitted
/// is always the most urgent one currently queued — not whichever caller
/// happened to arrive first.
pub struct Dispatcher {
    state: StdMutex<DispatcherState>,
    notify: Notify,
    next_seq: AtomicU64,
}

/// Held by an admitted caller; dropping it returns the slot to the pool and
/// wakes any queued callers so the next-most-urgent one can be admitted.
pub struct DispatchPermit<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for DispatchPermit<'_> {
    fn drop(&mut self) {
        let mut state = self.dispatcher.state.lock().expect("dispatcher state poisoned");
        state.available += 1;
        drop(state);
        self.dispatcher.notify.notify_waiters();
    }
}

impl Dispatcher {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            state: StdMutex::new(DispatcherState {
                available: max_concurrency,
                heap: BinaryHeap::new(),
            }),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Queue `key` at `priority` and wait until a slot is free and this
    /// caller is the most urgent one still waiting. Returns a permit that
    /// releases the slot on drop.
    pub async fn admit(&self, key: &str, priority: i32) -> DispatchPermit<'_> {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        {
            let mut state = self.state.lock().expect("dispatcher state poisoned");
            state.heap.push(QueuedItem {
                priority,
                seq,
                key: key.to_string(),
            });
        }
        loop {
            // Register interest before checking the condition so a release
            // that lands between the check and the await is never missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().expect("dispatcher state poisoned");
                let is_next = matches!(state.heap.peek(), Some(top) if top.seq == seq);
                if is_next && state.available > 0 {
                    state.available -= 1;
                    state.heap.pop();
                    return DispatchPermit { dispatcher: self };
                }
            }
            notified.await;
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.state.lock().expect("dispatcher state poisoned").heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_priority_pops_first() {
        let mut heap = BinaryHeap::new();
        heap.push(QueuedItem { priority: 10, seq: 0, key: "a".into() });
        heap.push(QueuedItem { priority: 90, seq: 1, key: "b".into() });
        heap.push(QueuedItem { priority: 50, seq: 2, key: "c".into() });
        assert_eq!(heap.pop().unwrap().key, "a");
        assert_eq!(heap.pop().unwrap().key, "c");
        assert_eq!(heap.pop().unwrap().key, "b");
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(QueuedItem { priority: 50, seq: 0, key: "first".into() });
        heap.push(QueuedItem { priority: 50, seq: 1, key: "second".into() });
        assert_eq!(heap.pop().unwrap().key, "first");
        assert_eq!(heap.pop().unwrap().key, "second");
    }

    #[tokio::test]
    async fn dispatcher_admits_up_to_concurrency_limit() {
        let dispatcher = Arc::new(Dispatcher::new(2));
        let _p1 = dispatcher.admit("a", 50).await;
        let _p2 = dispatcher.admit("b", 50).await;

        let d = dispatcher.clone();
        let third = tokio::spawn(async move {
            let _p3 = d.admit("c", 50).await;
        });

        // give the spawned admit a chance to queue and block
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.queue_depth(), 1);

        drop(_p1);
        third.await.unwrap();
    }

    #[tokio::test]
    async fn most_urgent_queued_caller_is_admitted_first() {
        let dispatcher = Arc::new(Dispatcher::new(1));
        let held = dispatcher.admit("initial", 50).await;

        let order = Arc::new(StdMutex::new(Vec::new()));

        let d = dispatcher.clone();
        let o = order.clone();
        let low_priority = tokio::spawn(async move {
            let _permit = d.admit("low-urgency", 100).await;
            o.lock().unwrap().push("low-urgency");
        });

        // ensure the priority-100 caller is queued first
        while dispatcher.queue_depth() < 1 {
            tokio::task::yield_now().await;
        }

        let d = dispatcher.clone();
        let o = order.clone();
        let high_priority = tokio::spawn(async move {
            let _permit = d.admit("high-urgency", 1).await;
            o.lock().unwrap().push("high-urgency");
        });

        while dispatcher.queue_depth() < 2 {
            tokio::task::yield_now().await;
        }

        drop(held);
        low_priority.await.unwrap();
        high_priority.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["high-urgency", "low-urgency"]);
    }

    #[tokio::test]
    async fn second_joiner_becomes_a_follower() {
        let dedup = InFlightDedup::default();
        match dedup.join("k").await {
            DedupOutcome::Leader => {}
            DedupOutcome::Follower(_) => panic!("expected leader"),
        }
        match dedup.join("k").await {
            DedupOutcome::Follower(_) => {}
            DedupOutcome::Leader => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn follower_receives_leader_result() {
        let dedup = Arc::new(InFlightDedup::default());
        let outcome = dedup.join("k").await;
        assert!(matches!(outcome, DedupOutcome::Leader));

        let follower = match dedup.join("k").await {
            DedupOutcome::Follower(rx) => rx,
            DedupOutcome::Leader => panic!("expected follower"),
        };

        dedup.finish("k", Ok(serde_json::json!({"v": 1}))).await;
        let result = await_follower(follower).await.unwrap();
        assert_eq!(result, serde_json::json!({"v": 1}));
    }
}
