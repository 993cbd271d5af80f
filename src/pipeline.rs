//! Triage pipeline: the loop binding stream, rules, store, AI queue and push.
//!
//! Each tick pulls one batch and processes records in order. A record is
//! acked only after its case is committed; failures leave it pending for
//! redelivery, and one bad record never halts the rest of the batch.

use crate::ai_queue::{AiQueue, EscalationRecord};
use crate::config::AppConfig;
use crate::error::{Result, TriageError};
use crate::meter::TrafficMeter;
use crate::push::PushBus;
use crate::rules::RuleEngine;
use crate::store::CaseStore;
use crate::stream::{EventSource, StreamRecord};
use crate::types::case::{CaseStatus, FraudCase, TriggeredBy, LAYER_RULE_BASED};
use crate::types::event::TransactionEvent;
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Generator of `CASE-<millis>-<seq>` identifiers. The sequence component
/// disambiguates cases created within the same millisecond by this worker.
#[derive(Default)]
pub struct CaseIdGenerator {
    state: Mutex<(i64, u32)>,
}

impl CaseIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        let millis = Utc::now().timestamp_millis();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.0 == millis {
            state.1 += 1;
        } else {
            *state = (millis, 0);
        }
        format!("CASE-{}-{}", state.0, state.1)
    }
}

/// The stream-to-store triage loop.
pub struct TriagePipeline {
    source: Arc<dyn EventSource>,
    store: Arc<dyn CaseStore>,
    ai_queue: Arc<dyn AiQueue>,
    push: PushBus,
    meter: Arc<TrafficMeter>,
    engine: RuleEngine,
    ids: CaseIdGenerator,
    batch_size: usize,
    poison_retry_limit: u64,
    op_timeout: Duration,
}

impl TriagePipeline {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn CaseStore>,
        ai_queue: Arc<dyn AiQueue>,
        push: PushBus,
        meter: Arc<TrafficMeter>,
        config: &AppConfig,
    ) -> Self {
        Self {
            source,
            store,
            ai_queue,
            push,
            meter,
            engine: RuleEngine::new(&config.rules),
            ids: CaseIdGenerator::new(),
            batch_size: config.pipeline.batch_size,
            poison_retry_limit: config.pipeline.poison_retry_limit,
            op_timeout: Duration::from_millis(config.pipeline.op_timeout_ms),
        }
    }

    /// Run ticks at `tick_interval` until shutdown. The batch in flight is
    /// always finished before stopping.
    pub async fn run(self: Arc<Self>, tick_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(tick_interval);
        info!(interval_ms = tick_interval.as_millis() as u64, "triage loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "triage tick failed, retrying next tick");
                    }
                }
                _ = shutdown.changed() => {
                    info!("triage loop stopping");
                    break;
                }
            }
        }
    }

    /// Pull and process one batch. Returns the number of records pulled.
    pub async fn tick(&self) -> Result<usize> {
        let records = self.source.read_batch(self.batch_size).await?;
        if records.is_empty() {
            return Ok(0);
        }

        self.meter.add(records.len() as u64);
        debug!(count = records.len(), "stream batch");

        for record in &records {
            if let Err(e) = self.process_record(record).await {
                // Not acked: the record stays pending and will come back.
                warn!(record_id = %record.id, error = %e, "record left for redelivery");
            }
        }

        Ok(records.len())
    }

    async fn process_record(&self, record: &StreamRecord) -> Result<()> {
        let event = match self.parse_event(record) {
            Ok(event) => event,
            Err(reason) => return self.handle_poison(record, reason).await,
        };

        let result = self.engine.evaluate(&event);
        let case_id = self.ids.next();
        let status = result.decision.initial_status();

        let mut case = FraudCase::new(
            &case_id,
            &event.user_id,
            &event.transaction_id,
            status,
            TriggeredBy::RuleEngine,
        );
        case.transaction_summary = event.transaction_summary();
        case.identity_flags = event.identity_flags();
        case.network_flags = event.network_flags();
        case.behavioral_flags = event.behavioral_flags();
        case.detection_signals = result.signals.clone();
        case.add_layer(LAYER_RULE_BASED);

        if result.is_definitive() {
            case.fraud_probability = Some(result.confidence);
            case.ai_reasoning = Some("Definitive rule match; no AI escalation required.".to_string());
        } else {
            case.fraud_probability = Some(result.risk_score);
            case.ai_reasoning = Some(
                "Rule engine identified high-risk patterns; escalating for multi-layer analysis."
                    .to_string(),
            );
        }

        let created = match timeout(self.op_timeout, self.store.create(case)).await {
            Ok(Ok(created)) => created,
            Ok(Err(TriageError::DuplicateTrigger(trigger))) => {
                // Redelivery after a commit that never got acked. The case
                // exists; do not enqueue again, just re-ack.
                info!(
                    record_id = %record.id,
                    trigger_transaction_id = %trigger,
                    "duplicate trigger, re-acking"
                );
                self.source.ack(&record.id).await?;
                return Ok(());
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TriageError::StoreUnavailable(
                    "case create timed out".to_string(),
                ))
            }
        };

        if !result.is_definitive() {
            self.enqueue_escalation(&created, &event).await;
        }

        self.push.publish_case(&created);
        self.source.ack(&record.id).await?;

        debug!(
            case_id = %created.case_id,
            status = %created.status,
            transaction_id = %event.transaction_id,
            "case triaged"
        );
        Ok(())
    }

    /// Hand a gray-area case to the AI investigator. Failure is logged and
    /// swallowed: the case is already persisted and stays under
    /// investigation until a human acts.
    async fn enqueue_escalation(&self, case: &FraudCase, event: &TransactionEvent) {
        let event_data = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(case_id = %case.case_id, error = %e, "event re-serialization failed");
                return;
            }
        };
        let escalation = EscalationRecord {
            case_id: case.case_id.clone(),
            user_id: case.user_id.clone(),
            event_data,
        };

        match timeout(self.op_timeout, self.ai_queue.enqueue(&escalation)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(case_id = %case.case_id, error = %e, "AI enqueue failed, case stays under investigation")
            }
            Err(_) => error!(case_id = %case.case_id, "AI enqueue timed out"),
        }
    }

    fn parse_event(&self, record: &StreamRecord) -> std::result::Result<TransactionEvent, String> {
        let raw = record
            .event_data()
            .ok_or_else(|| "missing event_data field".to_string())?;
        serde_json::from_str(raw).map_err(|e| format!("unparseable event: {e}"))
    }

    /// Poison policy: leave the record pending until it has been delivered
    /// more than `poison_retry_limit` times, then park it as a synthetic
    /// investigation case and ack so the stream can drain.
    async fn handle_poison(&self, record: &StreamRecord, reason: String) -> Result<()> {
        if record.delivery_count <= self.poison_retry_limit {
            error!(
                record_id = %record.id,
                delivery_count = record.delivery_count,
                reason = %reason,
                "poison record, leaving unacked"
            );
            return Err(TriageError::PoisonRecord {
                record_id: record.id.clone(),
                reason,
            });
        }

        warn!(
            record_id = %record.id,
            delivery_count = record.delivery_count,
            "poison record exceeded retry limit, parking as synthetic case"
        );

        let mut case = FraudCase::new(
            self.ids.next(),
            "unknown",
            // Keyed by the stream record id so racing redeliveries dedupe.
            &record.id,
            CaseStatus::UnderInvestigation,
            TriggeredBy::RuleEngine,
        );
        case.add_layer(LAYER_RULE_BASED);
        case.detection_signals.insert("poison".into(), json!(true));
        case.detection_signals.insert("reason".into(), json!(reason));

        match timeout(self.op_timeout, self.store.create(case)).await {
            Ok(Ok(created)) => self.push.publish_case(&created),
            Ok(Err(TriageError::DuplicateTrigger(_))) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TriageError::StoreUnavailable(
                    "poison case create timed out".to_string(),
                ))
            }
        }

        self.source.ack(&record.id).await
    }
}
