//! Case service: AI verdict ingress, human resolution and dashboard queries.

use crate::error::{Result, TriageError};
use crate::push::PushBus;
use crate::store::CaseStore;
use crate::types::case::{CaseStatus, FraudCase};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Verdict payload posted by the AI investigator.
///
/// The investigator mixes naming conventions on the wire (`caseId` next to
/// `investigation_layers`), so every field accepts both spellings. Missing
/// fields leave the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiCaseUpdate {
    #[serde(alias = "caseId")]
    pub case_id: String,

    #[serde(default)]
    pub decision: Option<String>,

    #[serde(default, alias = "confidenceScore")]
    pub confidence_score: Option<f64>,

    #[serde(default, alias = "aiReasoning")]
    pub ai_reasoning: Option<String>,

    #[serde(default, alias = "aiRecommendations")]
    pub ai_recommendations: Option<String>,

    #[serde(default, alias = "investigationLayers")]
    pub investigation_layers: Option<Vec<String>>,

    #[serde(default, alias = "detectionSignals")]
    pub detection_signals: Option<Map<String, Value>>,

    #[serde(default, alias = "aiSignals")]
    pub ai_signals: Option<Map<String, Value>>,
}

/// Human resolution of a case.
#[derive(Debug, Clone, Deserialize)]
pub struct Resolution {
    pub decision: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Mutation and query front-end over the case store. Every successful
/// mutation is pushed to the dashboard topic.
#[derive(Clone)]
pub struct CaseService {
    store: Arc<dyn CaseStore>,
    push: PushBus,
}

impl CaseService {
    pub fn new(store: Arc<dyn CaseStore>, push: PushBus) -> Self {
        Self { store, push }
    }

    /// Apply an AI verdict onto an existing case under the transition rules.
    pub async fn apply_ai_update(&self, update: AiCaseUpdate) -> Result<FraudCase> {
        if update.case_id.trim().is_empty() {
            return Err(TriageError::BadPayload("missing case_id".to_string()));
        }
        if let Some(confidence) = update.confidence_score {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(TriageError::BadPayload(format!(
                    "confidence_score out of range: {confidence}"
                )));
            }
        }

        let target_status = update.decision.as_deref().map(map_ai_decision);
        let case_id = update.case_id.clone();

        let updated = self
            .store
            .update_with(
                &case_id,
                Box::new(move |case| {
                    if let Some(reasoning) = update.ai_reasoning {
                        case.ai_reasoning = Some(reasoning);
                    }
                    if let Some(recommendations) = update.ai_recommendations {
                        case.ai_recommendations = Some(recommendations);
                    }
                    if let Some(confidence) = update.confidence_score {
                        case.confidence_score = Some(confidence);
                    }
                    if let Some(layers) = update.investigation_layers {
                        case.merge_layers(layers);
                    }
                    if let Some(signals) = update.detection_signals {
                        case.detection_signals = signals;
                    }
                    if let Some(signals) = update.ai_signals {
                        case.ai_signals = signals;
                    }
                    if let Some(status) = target_status {
                        case.status = status;
                    }
                    Ok(())
                }),
            )
            .await?;

        info!(case_id = %updated.case_id, status = %updated.status, "AI update applied");
        self.push.publish_case(&updated);
        Ok(updated)
    }

    /// Close a case with a human decision. Terminal.
    pub async fn resolve(&self, case_id: &str, resolution: Resolution) -> Result<FraudCase> {
        if resolution.decision.trim().is_empty() {
            return Err(TriageError::BadPayload("missing decision".to_string()));
        }

        let resolved = self
            .store
            .update_with(
                case_id,
                Box::new(move |case| {
                    case.status = CaseStatus::Resolved;
                    case.resolved_at = Some(Utc::now());
                    case.human_decision = Some(resolution.decision);
                    case.resolution_notes = resolution.notes;
                    Ok(())
                }),
            )
            .await?;

        info!(
            case_id = %resolved.case_id,
            decision = resolved.human_decision.as_deref().unwrap_or(""),
            "case resolved"
        );
        self.push.publish_case(&resolved);
        Ok(resolved)
    }

    /// Fetch one case or fail with `CaseNotFound`.
    pub async fn get(&self, case_id: &str) -> Result<FraudCase> {
        self.store
            .get_by_case_id(case_id)
            .await?
            .ok_or_else(|| TriageError::CaseNotFound(case_id.to_string()))
    }

    /// Cases awaiting manual attention, newest first.
    pub async fn review_queue(&self) -> Result<Vec<FraudCase>> {
        self.store
            .list_by_status_desc_created(&CaseStatus::review_queue())
            .await
    }

    /// All cases for one user.
    pub async fn cases_for_user(&self, user_id: &str) -> Result<Vec<FraudCase>> {
        self.store.list_by_user(user_id).await
    }

    /// Case counts per status.
    pub async fn stats(&self) -> Result<HashMap<CaseStatus, u64>> {
        self.store.stats().await
    }
}

/// Map an AI decision string onto the status machine. `ESCALATED` takes the
/// escalation edge; everything else non-definitive is coerced to
/// `UNDER_INVESTIGATION`.
fn map_ai_decision(decision: &str) -> CaseStatus {
    match CaseStatus::parse(decision) {
        Some(CaseStatus::AutoApproved) => CaseStatus::AutoApproved,
        Some(CaseStatus::AutoBlocked) => CaseStatus::AutoBlocked,
        Some(CaseStatus::Escalated) => CaseStatus::Escalated,
        Some(other) => {
            warn!(decision, coerced = %other, "non-definitive AI decision");
            CaseStatus::UnderInvestigation
        }
        None => {
            warn!(decision, "unknown AI decision, coercing to investigation");
            CaseStatus::UnderInvestigation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCaseStore;
    use crate::types::case::{TriggeredBy, LAYER_RULE_BASED};
    use serde_json::json;

    fn service() -> (CaseService, Arc<MemoryCaseStore>) {
        let store = Arc::new(MemoryCaseStore::new());
        let service = CaseService::new(store.clone(), PushBus::new(8));
        (service, store)
    }

    async fn seed_gray_case(store: &MemoryCaseStore) -> FraudCase {
        let mut case = FraudCase::new(
            "CASE-100-0",
            "USR-1",
            "TXN-1",
            CaseStatus::UnderInvestigation,
            TriggeredBy::RuleEngine,
        );
        case.add_layer(LAYER_RULE_BASED);
        case.fraud_probability = Some(0.40);
        store.create(case).await.unwrap()
    }

    #[tokio::test]
    async fn test_ai_verdict_flips_to_block() {
        let (service, store) = service();
        seed_gray_case(&store).await;

        let updated = service
            .apply_ai_update(AiCaseUpdate {
                case_id: "CASE-100-0".into(),
                decision: Some("AUTO_BLOCKED".into()),
                confidence_score: Some(0.92),
                investigation_layers: Some(vec!["ML_MODELS".into(), "LLM_REASONING".into()]),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.status, CaseStatus::AutoBlocked);
        assert_eq!(updated.confidence_score, Some(0.92));
        assert_eq!(
            updated.investigation_layers,
            vec!["RULE_BASED", "ML_MODELS", "LLM_REASONING"]
        );
    }

    #[tokio::test]
    async fn test_ambiguous_verdict_merges_evidence_in_place() {
        let (service, store) = service();
        seed_gray_case(&store).await;

        let mut signals = Map::new();
        signals.insert("graph_cluster".into(), json!("ring-17"));

        let updated = service
            .apply_ai_update(AiCaseUpdate {
                case_id: "CASE-100-0".into(),
                decision: Some("NEEDS_REVIEW".into()),
                ai_signals: Some(signals),
                ai_reasoning: Some("inconclusive".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.status, CaseStatus::UnderInvestigation);
        assert_eq!(updated.ai_signals["graph_cluster"], json!("ring-17"));
        assert_eq!(updated.ai_reasoning.as_deref(), Some("inconclusive"));
        // Untouched fields survive.
        assert_eq!(updated.fraud_probability, Some(0.40));
    }

    #[tokio::test]
    async fn test_escalate_verdict_takes_escalation_edge() {
        let (service, store) = service();
        seed_gray_case(&store).await;

        let updated = service
            .apply_ai_update(AiCaseUpdate {
                case_id: "CASE-100-0".into(),
                decision: Some("ESCALATED".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.status, CaseStatus::Escalated);
    }

    #[tokio::test]
    async fn test_missing_decision_leaves_status_alone() {
        let (service, store) = service();
        seed_gray_case(&store).await;
        // Escalate first, then send an evidence-only update: an unconditional
        // coercion to UNDER_INVESTIGATION would be an illegal transition here.
        service
            .apply_ai_update(AiCaseUpdate {
                case_id: "CASE-100-0".into(),
                decision: Some("ESCALATED".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = service
            .apply_ai_update(AiCaseUpdate {
                case_id: "CASE-100-0".into(),
                ai_reasoning: Some("still digging".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.status, CaseStatus::Escalated);
        assert_eq!(updated.ai_reasoning.as_deref(), Some("still digging"));
    }

    #[tokio::test]
    async fn test_reasoning_only_update_is_idempotent() {
        let (service, store) = service();
        seed_gray_case(&store).await;

        let update = AiCaseUpdate {
            case_id: "CASE-100-0".into(),
            ai_reasoning: Some("velocity pattern matches mule behavior".into()),
            ..Default::default()
        };

        let first = service.apply_ai_update(update.clone()).await.unwrap();
        let second = service.apply_ai_update(update).await.unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.ai_reasoning, second.ai_reasoning);
        assert_eq!(first.investigation_layers, second.investigation_layers);
        assert_eq!(first.confidence_score, second.confidence_score);
    }

    #[tokio::test]
    async fn test_update_unknown_case_is_not_found() {
        let (service, _store) = service();

        let err = service
            .apply_ai_update(AiCaseUpdate {
                case_id: "CASE-404-0".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TriageError::CaseNotFound(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_bad_payload() {
        let (service, store) = service();
        seed_gray_case(&store).await;

        for bad in [1.2, -0.1, f64::NAN, f64::INFINITY] {
            let err = service
                .apply_ai_update(AiCaseUpdate {
                    case_id: "CASE-100-0".into(),
                    confidence_score: Some(bad),
                    ..Default::default()
                })
                .await
                .unwrap_err();
            assert!(matches!(err, TriageError::BadPayload(_)), "value {bad}");
        }
    }

    #[tokio::test]
    async fn test_payload_aliases_accepted() {
        let json = r#"{
            "caseId": "CASE-100-0",
            "decision": "AUTO_BLOCKED",
            "confidenceScore": 0.96,
            "aiReasoning": "deposit far above declared income",
            "aiRecommendations": "block account and notify AML team",
            "detectionSignals": {"income_mismatch": true},
            "investigation_layers": ["ML_MODELS"],
            "ai_signals": {"model": "gnn-v2"}
        }"#;

        let update: AiCaseUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.case_id, "CASE-100-0");
        assert_eq!(update.confidence_score, Some(0.96));
        assert_eq!(update.investigation_layers.unwrap(), vec!["ML_MODELS"]);
        assert_eq!(update.ai_signals.unwrap()["model"], json!("gnn-v2"));
    }

    #[tokio::test]
    async fn test_resolution_closes_case() {
        let (service, store) = service();
        seed_gray_case(&store).await;

        let resolved = service
            .resolve(
                "CASE-100-0",
                Resolution {
                    decision: "APPROVED".into(),
                    notes: Some("legit traveler".into()),
                },
            )
            .await
            .unwrap();

        assert_eq!(resolved.status, CaseStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.human_decision.as_deref(), Some("APPROVED"));
        assert_eq!(resolved.resolution_notes.as_deref(), Some("legit traveler"));
    }

    #[tokio::test]
    async fn test_resolving_twice_fails_and_preserves_record() {
        let (service, store) = service();
        seed_gray_case(&store).await;

        let first = service
            .resolve(
                "CASE-100-0",
                Resolution {
                    decision: "BLOCKED".into(),
                    notes: None,
                },
            )
            .await
            .unwrap();

        let err = service
            .resolve(
                "CASE-100-0",
                Resolution {
                    decision: "APPROVED".into(),
                    notes: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::IllegalTransition { .. }));

        let stored = service.get("CASE-100-0").await.unwrap();
        assert_eq!(stored.human_decision, first.human_decision);
        assert_eq!(stored.resolved_at, first.resolved_at);
    }

    #[tokio::test]
    async fn test_mutations_publish_case_frames() {
        let store = Arc::new(MemoryCaseStore::new());
        let bus = PushBus::new(8);
        let service = CaseService::new(store.clone(), bus.clone());
        seed_gray_case(&store).await;

        let mut rx = bus.subscribe_cases();
        service
            .apply_ai_update(AiCaseUpdate {
                case_id: "CASE-100-0".into(),
                decision: Some("AUTO_APPROVED".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.case_id, "CASE-100-0");
        assert_eq!(frame.status, CaseStatus::AutoApproved);
    }
}
