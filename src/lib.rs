//! Fraud Triage Pipeline Library
//!
//! A real-time triage engine over a durable transaction stream: a two-stage
//! rule engine decides APPROVE / BLOCK / investigate, cases are persisted
//! behind an authoritative state machine, gray-area cases are escalated to
//! an external AI investigator, and every mutation is pushed to live
//! dashboard sessions.

pub mod ai_queue;
pub mod api;
pub mod cases;
pub mod config;
pub mod error;
pub mod meter;
pub mod pipeline;
pub mod push;
pub mod rules;
pub mod store;
pub mod stream;
pub mod types;

pub use ai_queue::{AiQueue, EscalationRecord, MemoryAiQueue, RedisAiQueue};
pub use cases::{AiCaseUpdate, CaseService, Resolution};
pub use config::AppConfig;
pub use error::TriageError;
pub use meter::TrafficMeter;
pub use pipeline::{CaseIdGenerator, TriagePipeline};
pub use push::{PushBus, StatsBroadcaster, StatsFrame};
pub use rules::{Decision, RuleEngine, RuleResult};
pub use store::{CaseStore, MemoryCaseStore};
pub use stream::{EventSource, MemoryEventSource, RedisEventSource, StreamRecord};
pub use types::case::{CaseStatus, FraudCase, TriggeredBy};
pub use types::event::TransactionEvent;
