//! Minimum-interval gate in front of the rebuild pipeline.
//!
//! The first qualifying event opens a rebuild and closes the gate for
//! `interval`. Events arriving while the gate is closed are dropped, not
//! deferred: a burst that ends inside the window is only picked up by the
//! next event after the window reopens.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::watcher::WatchEvent;

#[derive(Debug)]
pub struct DebounceGate {
    interval: Duration,
    last: Option<Instant>,
}

impl DebounceGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` when an event observed at `now` should trigger a rebuild.
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last
            && now.saturating_duration_since(last) < self.interval
        {
            return false;
        }
        self.last = Some(now);
        true
    }
}

/// Drains watcher events until the sender side is gone.
pub async fn drain<F>(mut events: UnboundedReceiver<WatchEvent>, mut gate: DebounceGate, mut trigger: F)
where
    F: FnMut(WatchEvent),
{
    while let Some(event) = events.recv().await {
        if gate.admit(Instant::now()) {
            info!(path = %event.path.display(), op = %event.op, "changes detected, rebuilding");
            trigger(event);
        } else {
            debug!(path = %event.path.display(), op = %event.op, "change inside debounce window");
        }
    }
    debug!("watch channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::WatchOp;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn event(name: &str) -> WatchEvent {
        WatchEvent {
            path: PathBuf::from(name),
            op: WatchOp::Write,
        }
    }

    async fn replay(offsets_ms: &[u64]) -> Vec<(Duration, PathBuf)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let fired = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = fired.clone();
        let task = tokio::spawn(drain(rx, DebounceGate::new(Duration::from_secs(1)), move |ev| {
            sink.lock().push((start.elapsed(), ev.path));
        }));

        for (idx, offset) in offsets_ms.iter().enumerate() {
            tokio::time::sleep_until(start + Duration::from_millis(*offset)).await;
            tx.send(event(&format!("{idx}.conf"))).unwrap();
            tokio::task::yield_now().await;
        }
        drop(tx);
        task.await.unwrap();
        let fired = fired.lock().clone();
        fired
    }

    #[test]
    fn gate_opens_once_per_interval() {
        let mut gate = DebounceGate::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(gate.admit(t0));
        assert!(!gate.admit(t0 + Duration::from_millis(999)));
        assert!(gate.admit(t0 + Duration::from_secs(1)));
        assert!(!gate.admit(t0 + Duration::from_millis(1500)));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_two_rebuilds() {
        let fired = replay(&[0, 200, 900, 1300]).await;
        let paths: Vec<_> = fired.iter().map(|(_, path)| path.clone()).collect();
        assert_eq!(paths, [PathBuf::from("0.conf"), PathBuf::from("3.conf")]);
        assert!(fired[0].0 < Duration::from_millis(100));
        assert!(fired[1].0 >= Duration::from_millis(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_event_inside_window_is_dropped() {
        let fired = replay(&[0, 500]).await;
        assert_eq!(fired.len(), 1);
    }
}
