//! Two-stage rule engine: definitive rules, then additive risk scoring.

use crate::config::RulesConfig;
use crate::types::case::CaseStatus;
use crate::types::event::{TransactionEvent, TransactionType};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Risk contribution for VPN access from a high-risk country.
const RISK_VPN_HIGH_RISK: f64 = 0.25;
/// Risk contribution for a device shared by many users.
const RISK_SHARED_DEVICE: f64 = 0.15;
/// Risk contribution for rapid deposit/withdrawal churn.
const RISK_RAPID_CHURN: f64 = 0.30;
/// Risk contribution for a weak document verification.
const RISK_DOCUMENT_ISSUES: f64 = 0.20;

/// How many users on one device before it counts as shared.
const SHARED_DEVICE_USER_LIMIT: i64 = 5;
/// Document confidence below this contributes risk.
const DOCUMENT_CONFIDENCE_FLOOR: f64 = 0.70;

/// Triage decision emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Block,
    Investigate,
}

impl Decision {
    /// Initial case status implied by this decision.
    pub fn initial_status(self) -> CaseStatus {
        match self {
            Decision::Approve => CaseStatus::AutoApproved,
            Decision::Block => CaseStatus::AutoBlocked,
            Decision::Investigate => CaseStatus::UnderInvestigation,
        }
    }
}

/// Outcome of evaluating one event.
#[derive(Debug, Clone)]
pub struct RuleResult {
    pub decision: Decision,
    pub confidence: f64,
    pub risk_score: f64,
    pub signals: Map<String, Value>,
}

impl RuleResult {
    fn new(decision: Decision, confidence: f64) -> Self {
        Self {
            decision,
            confidence,
            risk_score: 0.0,
            signals: Map::new(),
        }
    }

    /// APPROVE and BLOCK are definitive and short-circuit escalation.
    pub fn is_definitive(&self) -> bool {
        matches!(self.decision, Decision::Approve | Decision::Block)
    }

    fn add_signal(&mut self, key: &str, value: Value) {
        self.signals.insert(key.to_string(), value);
    }
}

/// Rule engine with configurable thresholds.
///
/// Evaluation is deterministic for a given event and velocity-window state.
/// The velocity tracker is the only state; it ignores replays of the same
/// transaction id so at-least-once delivery cannot change a verdict.
pub struct RuleEngine {
    approve_below: f64,
    block_above: f64,
    income_multiple: f64,
    velocity: VelocityTracker,
}

impl RuleEngine {
    pub fn new(config: &RulesConfig) -> Self {
        Self {
            approve_below: config.approve_below,
            block_above: config.block_above,
            income_multiple: config.income_multiple,
            velocity: VelocityTracker::new(Duration::seconds(config.velocity_window_secs as i64)),
        }
    }

    /// Evaluate an event: definitive rules first, additive scoring second.
    pub fn evaluate(&self, event: &TransactionEvent) -> RuleResult {
        // -------------------- Phase A: definitive rules --------------------
        if let Some(ip) = &event.ip_profile {
            if ip.sanctioned_country {
                let mut result = RuleResult::new(Decision::Block, 1.0);
                result.add_signal("sanctions_match", json!("accessing from sanctioned country"));
                return result;
            }
        }

        if let Some(user) = &event.user_profile {
            let income = user.declared_monthly_income;
            if income > 0.0 && event.amount > income * self.income_multiple {
                let mut result = RuleResult::new(Decision::Block, 0.98);
                result.add_signal(
                    "income_mismatch",
                    json!({
                        "amount": event.amount,
                        "declared_monthly_income": income,
                    }),
                );
                return result;
            }
        }

        // -------------------- Phase B: additive risk score --------------------
        let mut risk_score = 0.0;
        let mut signals = Map::new();

        if let Some(ip) = &event.ip_profile {
            if ip.vpn && ip.high_risk_country {
                risk_score += RISK_VPN_HIGH_RISK;
                signals.insert("vpn_detected".into(), json!(true));
            }
        }

        if let Some(device) = &event.device_profile {
            if device.total_users_count > SHARED_DEVICE_USER_LIMIT {
                risk_score += RISK_SHARED_DEVICE;
                signals.insert("multiple_devices".into(), json!(device.total_users_count));
            }
        }

        if self.velocity.observe(event) {
            risk_score += RISK_RAPID_CHURN;
            signals.insert("rapid_churn".into(), json!(true));
        }

        if let Some(doc) = &event.document_profile {
            if let Some(score) = doc.confidence_score {
                if score < DOCUMENT_CONFIDENCE_FLOOR {
                    risk_score += RISK_DOCUMENT_ISSUES;
                    signals.insert("document_issues".into(), json!(score));
                }
            }
        }

        // -------------------- Thresholds --------------------
        let mut result = if risk_score < self.approve_below {
            RuleResult::new(Decision::Approve, 0.95)
        } else if risk_score > self.block_above {
            RuleResult::new(Decision::Block, 0.96)
        } else {
            RuleResult::new(Decision::Investigate, 0.50)
        };

        result.risk_score = risk_score.clamp(0.0, 1.0);
        result.signals = signals;
        result
    }
}

/// Per-user sliding window backing the rapid-churn check.
///
/// Churn means a deposit and a withdrawal from the same user inside the
/// window; trades neither arm nor trigger it.
struct VelocityTracker {
    window: Duration,
    seen: Mutex<HashMap<String, VecDeque<WindowEntry>>>,
}

struct WindowEntry {
    at: DateTime<Utc>,
    direction: TransactionType,
    transaction_id: String,
}

impl VelocityTracker {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record the event and report whether it completes a churn pair.
    fn observe(&self, event: &TransactionEvent) -> bool {
        let opposite = match event.transaction_type {
            TransactionType::Deposit => TransactionType::Withdrawal,
            TransactionType::Withdrawal => TransactionType::Deposit,
            TransactionType::Trade => return false,
        };

        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entries = seen.entry(event.user_id.clone()).or_default();

        let cutoff = event.timestamp - self.window;
        while entries.front().is_some_and(|entry| entry.at < cutoff) {
            entries.pop_front();
        }

        // Redelivered records must not pair with themselves.
        if entries
            .iter()
            .any(|entry| entry.transaction_id == event.transaction_id)
        {
            return entries.iter().any(|entry| {
                entry.direction == opposite && entry.transaction_id != event.transaction_id
            });
        }

        let churn = entries.iter().any(|entry| entry.direction == opposite);
        entries.push_back(WindowEntry {
            at: event.timestamp,
            direction: event.transaction_type,
            transaction_id: event.transaction_id.clone(),
        });
        churn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{DeviceProfile, DocumentProfile, IpProfile, UserProfile};

    fn engine() -> RuleEngine {
        RuleEngine::new(&RulesConfig::default())
    }

    fn clean_event(id: &str) -> TransactionEvent {
        TransactionEvent::new(id, "USR-1", TransactionType::Deposit, 50.0)
            .with_ip_profile(IpProfile::default())
            .with_device_profile(DeviceProfile {
                total_users_count: 1,
                ..Default::default()
            })
            .with_document_profile(DocumentProfile {
                confidence_score: Some(0.95),
                ..Default::default()
            })
    }

    #[test]
    fn test_sanctioned_country_blocks_definitively() {
        let event = TransactionEvent::new("TXN-1", "USR-1", TransactionType::Deposit, 50.0)
            .with_ip_profile(IpProfile {
                sanctioned_country: true,
                ..Default::default()
            });

        let result = engine().evaluate(&event);

        assert_eq!(result.decision, Decision::Block);
        assert!(result.is_definitive());
        assert_eq!(result.confidence, 1.0);
        assert!(result.signals.contains_key("sanctions_match"));
    }

    #[test]
    fn test_income_mismatch_blocks() {
        let event = TransactionEvent::new("TXN-2", "USR-1", TransactionType::Deposit, 20_000.0)
            .with_user_profile(UserProfile {
                declared_monthly_income: 1_000.0,
                ..Default::default()
            });

        let result = engine().evaluate(&event);

        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.confidence, 0.98);
        let detail = &result.signals["income_mismatch"];
        assert_eq!(detail["amount"], json!(20_000.0));
        assert_eq!(detail["declared_monthly_income"], json!(1_000.0));
    }

    #[test]
    fn test_sanctions_rule_wins_over_income_rule() {
        let event = TransactionEvent::new("TXN-3", "USR-1", TransactionType::Deposit, 20_000.0)
            .with_ip_profile(IpProfile {
                sanctioned_country: true,
                ..Default::default()
            })
            .with_user_profile(UserProfile {
                declared_monthly_income: 1.0,
                ..Default::default()
            });

        let result = engine().evaluate(&event);

        assert!(result.signals.contains_key("sanctions_match"));
        assert!(!result.signals.contains_key("income_mismatch"));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_undeclared_income_skips_mismatch_rule() {
        let event = TransactionEvent::new("TXN-4", "USR-1", TransactionType::Deposit, 1_000_000.0)
            .with_user_profile(UserProfile {
                declared_monthly_income: 0.0,
                ..Default::default()
            });

        let result = engine().evaluate(&event);
        assert_eq!(result.decision, Decision::Approve);
    }

    #[test]
    fn test_clean_event_auto_approves() {
        let result = engine().evaluate(&clean_event("TXN-5"));

        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.risk_score, 0.0);
        assert!(result.signals.is_empty());
    }

    #[test]
    fn test_vpn_and_shared_device_land_in_gray_area() {
        let event = TransactionEvent::new("TXN-6", "USR-2", TransactionType::Deposit, 500.0)
            .with_ip_profile(IpProfile {
                vpn: true,
                high_risk_country: true,
                ..Default::default()
            })
            .with_device_profile(DeviceProfile {
                total_users_count: 8,
                ..Default::default()
            });

        let result = engine().evaluate(&event);

        assert_eq!(result.decision, Decision::Investigate);
        assert!(!result.is_definitive());
        assert_eq!(result.confidence, 0.50);
        assert!((result.risk_score - 0.40).abs() < 1e-9);
        assert_eq!(result.signals["vpn_detected"], json!(true));
        assert_eq!(result.signals["multiple_devices"], json!(8));
    }

    #[test]
    fn test_all_contributions_exceed_block_threshold() {
        let eng = engine();

        // Arm the velocity window with an opposite-direction transaction.
        let deposit = TransactionEvent::new("TXN-7a", "USR-3", TransactionType::Deposit, 100.0);
        assert_eq!(eng.evaluate(&deposit).decision, Decision::Approve);

        let withdrawal =
            TransactionEvent::new("TXN-7b", "USR-3", TransactionType::Withdrawal, 100.0)
                .with_ip_profile(IpProfile {
                    vpn: true,
                    high_risk_country: true,
                    ..Default::default()
                })
                .with_device_profile(DeviceProfile {
                    total_users_count: 9,
                    ..Default::default()
                })
                .with_document_profile(DocumentProfile {
                    confidence_score: Some(0.40),
                    ..Default::default()
                });

        let result = eng.evaluate(&withdrawal);

        // 0.25 + 0.15 + 0.30 + 0.20 = 0.90 > 0.75
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.confidence, 0.96);
        assert_eq!(result.signals["rapid_churn"], json!(true));
        assert!((result.risk_score - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let eng = engine();
        let event = clean_event("TXN-8");

        let first = eng.evaluate(&event);
        let second = eng.evaluate(&event);

        assert_eq!(first.decision, second.decision);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.risk_score, second.risk_score);
        assert_eq!(first.signals, second.signals);
    }

    #[test]
    fn test_velocity_ignores_redelivered_transaction() {
        let eng = engine();
        let deposit = TransactionEvent::new("TXN-9", "USR-4", TransactionType::Deposit, 10.0);

        // Same transaction delivered twice must not pair with itself.
        assert_eq!(eng.evaluate(&deposit).decision, Decision::Approve);
        let replay = eng.evaluate(&deposit);
        assert_eq!(replay.decision, Decision::Approve);
        assert!(!replay.signals.contains_key("rapid_churn"));
    }

    #[test]
    fn test_velocity_window_expires() {
        let eng = engine();

        let mut deposit = TransactionEvent::new("TXN-10a", "USR-5", TransactionType::Deposit, 10.0);
        deposit.timestamp = Utc::now() - Duration::minutes(10);
        eng.evaluate(&deposit);

        let withdrawal =
            TransactionEvent::new("TXN-10b", "USR-5", TransactionType::Withdrawal, 10.0);
        let result = eng.evaluate(&withdrawal);

        assert!(!result.signals.contains_key("rapid_churn"));
    }

    #[test]
    fn test_trades_do_not_arm_velocity() {
        let eng = engine();

        eng.evaluate(&TransactionEvent::new("TXN-11a", "USR-6", TransactionType::Trade, 10.0));
        let result = eng.evaluate(&TransactionEvent::new(
            "TXN-11b",
            "USR-6",
            TransactionType::Withdrawal,
            10.0,
        ));

        assert!(!result.signals.contains_key("rapid_churn"));
    }

    #[test]
    fn test_weak_document_contributes_risk() {
        let event = TransactionEvent::new("TXN-12", "USR-7", TransactionType::Deposit, 10.0)
            .with_document_profile(DocumentProfile {
                confidence_score: Some(0.60),
                ..Default::default()
            });

        let result = engine().evaluate(&event);

        assert_eq!(result.decision, Decision::Investigate);
        assert_eq!(result.signals["document_issues"], json!(0.60));
        assert!((result.risk_score - 0.20).abs() < 1e-9);
    }
}
