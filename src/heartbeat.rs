//! Periodic `ping` probes while a connection is open.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::protocol::{ClientCommand, Envelope};

/// Sends a heartbeat frame into the connection's outbound queue every
/// `interval`, starting one interval after [`start`](Self::start).
///
/// When the outbound queue is closed (the transport task ended) the tick is
/// skipped silently; the monitor keeps running until [`stop`](Self::stop).
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Start probing into `outbound`, replacing any previous timer.
    pub fn start(&mut self, outbound: mpsc::UnboundedSender<String>) {
        self.stop();
        let interval = self.interval;
        let probe = ping_frame();
        let first_tick = tokio::time::Instant::now() + interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if outbound.send(probe.clone()).is_ok() {
                    trace!("heartbeat sent");
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ping_frame() -> String {
    serde_json::to_string(&ClientCommand::Ping).unwrap_or_else(|_| {
        // Unit variant; serialization cannot fail.
        format!(r#"{{"type":"{}"}}"#, crate::protocol::PING)
    })
}

/// Returns `true` if an outbound `frame` is a heartbeat probe.
pub fn is_probe(frame: &str) -> bool {
    serde_json::from_str::<Envelope>(frame).is_ok_and(|env| env.kind == crate::protocol::PING)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn probe_is_a_bare_ping_envelope() {
        assert_eq!(ping_frame(), r#"{"type":"ping"}"#);
        assert!(is_probe(&ping_frame()));
        assert!(!is_probe(r#"{"type":"chat","data":{"message":"hi"}}"#));
        assert!(!is_probe("garbage"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_probe_after_one_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(10));
        monitor.start(tx);
        settle().await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(drain(&mut rx).len(), 1);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(10)).await;
            settle().await;
        }
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_probes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(10));
        monitor.start(tx);
        monitor.stop();
        assert!(!monitor.is_running());

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(10));
        monitor.start(tx.clone());
        monitor.start(tx.clone());
        monitor.start(tx);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_is_skipped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(1));
        monitor.start(tx);
        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert!(monitor.is_running());
    }
}
