//! Fraud case record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle status of a fraud case.
///
/// Transitions are monotonic: a case created by a definitive rule is only
/// ever resolved by a human, a gray-area case moves through investigation,
/// and `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    AutoApproved,
    AutoBlocked,
    UnderInvestigation,
    Escalated,
    Resolved,
}

impl CaseStatus {
    /// All statuses, in display order.
    pub const ALL: [CaseStatus; 5] = [
        CaseStatus::AutoApproved,
        CaseStatus::AutoBlocked,
        CaseStatus::UnderInvestigation,
        CaseStatus::Escalated,
        CaseStatus::Resolved,
    ];

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::AutoApproved => "AUTO_APPROVED",
            CaseStatus::AutoBlocked => "AUTO_BLOCKED",
            CaseStatus::UnderInvestigation => "UNDER_INVESTIGATION",
            CaseStatus::Escalated => "ESCALATED",
            CaseStatus::Resolved => "RESOLVED",
        }
    }

    /// Parse a status name, case-insensitively. Unknown names yield `None`
    /// rather than being coerced; callers decide how to surface that.
    pub fn parse(raw: &str) -> Option<CaseStatus> {
        CaseStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    /// Whether moving from `self` to `to` is a legal edge.
    ///
    /// A same-status update is an evidence merge, not a transition; it is
    /// permitted everywhere except on a resolved case, which accepts no
    /// mutation at all.
    pub fn can_transition_to(self, to: CaseStatus) -> bool {
        use CaseStatus::*;
        if self == Resolved {
            return false;
        }
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (UnderInvestigation, AutoApproved)
                | (UnderInvestigation, AutoBlocked)
                | (UnderInvestigation, Escalated)
                | (AutoApproved, Resolved)
                | (AutoBlocked, Resolved)
                | (UnderInvestigation, Resolved)
                | (Escalated, Resolved)
        )
    }

    /// Statuses shown in the manual review queue.
    pub fn review_queue() -> [CaseStatus; 2] {
        [CaseStatus::UnderInvestigation, CaseStatus::Escalated]
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which detection layer opened the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggeredBy {
    RuleEngine,
    MlModel,
    PatternMatch,
    ManualFlag,
}

/// Investigation layer labels written into `investigation_layers`.
pub const LAYER_RULE_BASED: &str = "RULE_BASED";

/// Persistent record of one triage outcome for one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudCase {
    pub case_id: String,
    pub user_id: String,
    pub trigger_transaction_id: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,

    pub status: CaseStatus,
    pub confidence_score: Option<f64>,
    pub fraud_probability: Option<f64>,

    pub triggered_by: TriggeredBy,

    /// Ordered set of layers that have touched this case, e.g.
    /// `["RULE_BASED", "ML_MODELS", "LLM_REASONING"]`.
    #[serde(default)]
    pub investigation_layers: Vec<String>,

    #[serde(default)]
    pub detection_signals: Map<String, Value>,
    #[serde(default)]
    pub transaction_summary: Map<String, Value>,
    #[serde(default)]
    pub identity_flags: Map<String, Value>,
    #[serde(default)]
    pub behavioral_flags: Map<String, Value>,
    #[serde(default)]
    pub network_flags: Map<String, Value>,
    #[serde(default)]
    pub ai_signals: Map<String, Value>,

    pub ai_reasoning: Option<String>,
    pub ai_recommendations: Option<String>,

    pub assigned_to: Option<String>,
    pub human_decision: Option<String>,
    pub resolution_notes: Option<String>,

    #[serde(default)]
    pub related_accounts: Vec<String>,
    pub fraud_ring_id: Option<String>,
}

impl FraudCase {
    /// Create a fresh case; `created_at` and `updated_at` are stamped now.
    pub fn new(
        case_id: impl Into<String>,
        user_id: impl Into<String>,
        trigger_transaction_id: impl Into<String>,
        status: CaseStatus,
        triggered_by: TriggeredBy,
    ) -> Self {
        let now = Utc::now();
        Self {
            case_id: case_id.into(),
            user_id: user_id.into(),
            trigger_transaction_id: trigger_transaction_id.into(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            status,
            confidence_score: None,
            fraud_probability: None,
            triggered_by,
            investigation_layers: Vec::new(),
            detection_signals: Map::new(),
            transaction_summary: Map::new(),
            identity_flags: Map::new(),
            behavioral_flags: Map::new(),
            network_flags: Map::new(),
            ai_signals: Map::new(),
            ai_reasoning: None,
            ai_recommendations: None,
            assigned_to: None,
            human_decision: None,
            resolution_notes: None,
            related_accounts: Vec::new(),
            fraud_ring_id: None,
        }
    }

    /// Append a layer, preserving first-seen order and ignoring duplicates.
    pub fn add_layer(&mut self, layer: impl Into<String>) {
        let layer = layer.into();
        if !self.investigation_layers.iter().any(|l| l == &layer) {
            self.investigation_layers.push(layer);
        }
    }

    /// Union `incoming` into the layer set, keeping existing order and
    /// appending new entries in their incoming order.
    pub fn merge_layers<I>(&mut self, incoming: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for layer in incoming {
            self.add_layer(layer);
        }
    }

    /// Clamp both scores into `[0,1]`. Applied at the store boundary.
    pub fn clamp_scores(&mut self) {
        if let Some(score) = self.confidence_score {
            self.confidence_score = Some(score.clamp(0.0, 1.0));
        }
        if let Some(score) = self.fraud_probability {
            self.fraud_probability = Some(score.clamp(0.0, 1.0));
        }
    }
}
