//! Push fan-out to live dashboard sessions.
//!
//! Two topics: per-case deltas and a once-per-second stats frame. Delivery
//! is best-effort and at-most-once; a lagging subscriber loses frames and
//! reconciles through the REST queue endpoint on reconnect.

use crate::error::Result;
use crate::meter::TrafficMeter;
use crate::store::CaseStore;
use crate::types::case::{CaseStatus, FraudCase};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

/// Destination of per-case frames.
pub const CASE_TOPIC: &str = "/topic/queue";
/// Destination of stats frames.
pub const STATS_TOPIC: &str = "/topic/stats";

/// Aggregate frame broadcast once per second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsFrame {
    pub total_cases: u64,
    pub auto_approved: u64,
    pub auto_blocked: u64,
    pub manual_cases: u64,
    pub tps: u64,
}

/// Topic-based fan-out over bounded broadcast channels.
///
/// Publishing never blocks and never fails the caller: with no subscribers
/// the frame is dropped, and a subscriber that falls behind the buffer loses
/// the oldest frames.
#[derive(Clone)]
pub struct PushBus {
    cases: broadcast::Sender<FraudCase>,
    stats: broadcast::Sender<StatsFrame>,
}

impl PushBus {
    /// Create a bus whose per-subscriber buffers hold `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let (cases, _) = broadcast::channel(capacity);
        let (stats, _) = broadcast::channel(capacity);
        Self { cases, stats }
    }

    /// Publish a case mutation. Best-effort.
    pub fn publish_case(&self, case: &FraudCase) {
        if self.cases.send(case.clone()).is_err() {
            trace!(case_id = %case.case_id, "no case subscribers, frame dropped");
        }
    }

    /// Publish a stats frame. Best-effort.
    pub fn publish_stats(&self, frame: StatsFrame) {
        if self.stats.send(frame).is_err() {
            trace!("no stats subscribers, frame dropped");
        }
    }

    pub fn subscribe_cases(&self) -> broadcast::Receiver<FraudCase> {
        self.cases.subscribe()
    }

    pub fn subscribe_stats(&self) -> broadcast::Receiver<StatsFrame> {
        self.stats.subscribe()
    }
}

impl Default for PushBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Periodic task draining the traffic meter into a stats frame.
pub struct StatsBroadcaster {
    store: Arc<dyn CaseStore>,
    meter: Arc<TrafficMeter>,
    push: PushBus,
    interval: Duration,
    last_tps: Arc<AtomicU64>,
}

impl StatsBroadcaster {
    pub fn new(
        store: Arc<dyn CaseStore>,
        meter: Arc<TrafficMeter>,
        push: PushBus,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            meter,
            push,
            interval,
            last_tps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle to the most recent TPS value, for the REST stats endpoint.
    /// The meter read is destructive, so REST must not trigger another one.
    pub fn last_tps_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.last_tps)
    }

    /// Run until shutdown, broadcasting one frame per interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let elapsed = last_tick.elapsed();
                    last_tick = Instant::now();
                    match self.collect(elapsed).await {
                        Ok(frame) => {
                            self.last_tps.store(frame.tps, Ordering::Relaxed);
                            self.push.publish_stats(frame);
                        }
                        Err(e) => warn!(error = %e, "stats collection failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("stats broadcaster stopping");
                    break;
                }
            }
        }
    }

    async fn collect(&self, elapsed: Duration) -> Result<StatsFrame> {
        let consumed = self.meter.get_and_reset();
        let tps = if elapsed.as_secs_f64() > 0.0 {
            (consumed as f64 / elapsed.as_secs_f64()) as u64
        } else {
            0
        };

        let counts = self.store.stats().await?;
        let count = |status: CaseStatus| counts.get(&status).copied().unwrap_or(0);

        Ok(StatsFrame {
            total_cases: counts.values().sum(),
            auto_approved: count(CaseStatus::AutoApproved),
            auto_blocked: count(CaseStatus::AutoBlocked),
            manual_cases: count(CaseStatus::UnderInvestigation),
            tps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCaseStore;
    use crate::types::case::TriggeredBy;

    #[tokio::test]
    async fn test_case_frames_reach_subscribers() {
        let bus = PushBus::new(8);
        let mut rx = bus.subscribe_cases();

        let case = FraudCase::new(
            "CASE-1-0",
            "USR-1",
            "TXN-1",
            CaseStatus::UnderInvestigation,
            TriggeredBy::RuleEngine,
        );
        bus.publish_case(&case);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.case_id, "CASE-1-0");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = PushBus::new(8);
        let case = FraudCase::new(
            "CASE-1-0",
            "USR-1",
            "TXN-1",
            CaseStatus::AutoApproved,
            TriggeredBy::RuleEngine,
        );

        // Must not panic or block.
        bus.publish_case(&case);
        bus.publish_stats(StatsFrame {
            total_cases: 0,
            auto_approved: 0,
            auto_blocked: 0,
            manual_cases: 0,
            tps: 0,
        });
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_oldest() {
        let bus = PushBus::new(2);
        let mut rx = bus.subscribe_stats();

        for tps in 0..5 {
            bus.publish_stats(StatsFrame {
                total_cases: 0,
                auto_approved: 0,
                auto_blocked: 0,
                manual_cases: 0,
                tps,
            });
        }

        // Buffer of 2: the oldest three frames are gone.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().tps, 3);
        assert_eq!(rx.recv().await.unwrap().tps, 4);
    }

    #[tokio::test]
    async fn test_stats_collection() {
        let store = Arc::new(MemoryCaseStore::new());
        let meter = Arc::new(TrafficMeter::new());
        let bus = PushBus::new(8);

        store
            .create(FraudCase::new(
                "CASE-1-0",
                "USR-1",
                "TXN-1",
                CaseStatus::AutoApproved,
                TriggeredBy::RuleEngine,
            ))
            .await
            .unwrap();
        store
            .create(FraudCase::new(
                "CASE-1-1",
                "USR-1",
                "TXN-2",
                CaseStatus::UnderInvestigation,
                TriggeredBy::RuleEngine,
            ))
            .await
            .unwrap();
        meter.add(20);

        let broadcaster =
            StatsBroadcaster::new(store, meter, bus, Duration::from_secs(1));
        let frame = broadcaster.collect(Duration::from_secs(2)).await.unwrap();

        assert_eq!(frame.total_cases, 2);
        assert_eq!(frame.auto_approved, 1);
        assert_eq!(frame.manual_cases, 1);
        assert_eq!(frame.auto_blocked, 0);
        // 20 records over 2 seconds, rounded down.
        assert_eq!(frame.tps, 10);
    }
}
