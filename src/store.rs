//! Case store: the single source of truth for fraud cases.
//!
//! Every mutation goes through the store, which enforces the status
//! transition table and clamps scores before committing. `update_with` is
//! the transactional scope for multi-field mutations: the closure runs on a
//! copy under the store lock and an illegal transition rolls it back.

use crate::error::{Result, TriageError};
use crate::types::case::{CaseStatus, FraudCase};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

/// Owned mutation applied inside the store's transactional scope.
pub type MutateFn = Box<dyn FnOnce(&mut FraudCase) -> Result<()> + Send>;

/// Transactional store of fraud cases keyed by `case_id`, with secondary
/// lookups by user and status.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Persist a new case. Fails with `DuplicateTrigger` when a case already
    /// exists for the same trigger transaction.
    async fn create(&self, case: FraudCase) -> Result<FraudCase>;

    async fn get_by_case_id(&self, case_id: &str) -> Result<Option<FraudCase>>;

    async fn get_by_trigger(&self, trigger_transaction_id: &str) -> Result<Option<FraudCase>>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<FraudCase>>;

    async fn list_by_status(&self, statuses: &[CaseStatus]) -> Result<Vec<FraudCase>>;

    /// Like `list_by_status`, ordered by `created_at` descending. Backs the
    /// dashboard review queue.
    async fn list_by_status_desc_created(&self, statuses: &[CaseStatus]) -> Result<Vec<FraudCase>>;

    async fn list_by_assignee(&self, assignee: &str) -> Result<Vec<FraudCase>>;

    /// Replace a case wholesale. Enforces the transition table against the
    /// stored status and touches `updated_at`.
    async fn update(&self, case: FraudCase) -> Result<FraudCase>;

    /// Atomically mutate one case. The closure's changes are validated
    /// against the transition table; any error rolls the mutation back.
    async fn update_with(&self, case_id: &str, mutate: MutateFn) -> Result<FraudCase>;

    /// Case counts per status.
    async fn stats(&self) -> Result<HashMap<CaseStatus, u64>>;
}

/// In-memory store backing tests and single-node deployments. The relational
/// layer sits behind the same trait.
#[derive(Default)]
pub struct MemoryCaseStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    cases: HashMap<String, FraudCase>,
    by_trigger: HashMap<String, String>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_transition(current: &FraudCase, next: &FraudCase) -> Result<()> {
        if !current.status.can_transition_to(next.status) {
            return Err(TriageError::IllegalTransition {
                from: current.status,
                to: next.status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn create(&self, mut case: FraudCase) -> Result<FraudCase> {
        let mut inner = self.write();

        if inner.by_trigger.contains_key(&case.trigger_transaction_id) {
            return Err(TriageError::DuplicateTrigger(
                case.trigger_transaction_id.clone(),
            ));
        }
        if inner.cases.contains_key(&case.case_id) {
            return Err(TriageError::StoreUnavailable(format!(
                "case id collision: {}",
                case.case_id
            )));
        }

        case.clamp_scores();
        inner
            .by_trigger
            .insert(case.trigger_transaction_id.clone(), case.case_id.clone());
        inner.cases.insert(case.case_id.clone(), case.clone());
        Ok(case)
    }

    async fn get_by_case_id(&self, case_id: &str) -> Result<Option<FraudCase>> {
        Ok(self.read().cases.get(case_id).cloned())
    }

    async fn get_by_trigger(&self, trigger_transaction_id: &str) -> Result<Option<FraudCase>> {
        let inner = self.read();
        Ok(inner
            .by_trigger
            .get(trigger_transaction_id)
            .and_then(|case_id| inner.cases.get(case_id))
            .cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<FraudCase>> {
        Ok(self
            .read()
            .cases
            .values()
            .filter(|case| case.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, statuses: &[CaseStatus]) -> Result<Vec<FraudCase>> {
        Ok(self
            .read()
            .cases
            .values()
            .filter(|case| statuses.contains(&case.status))
            .cloned()
            .collect())
    }

    async fn list_by_status_desc_created(&self, statuses: &[CaseStatus]) -> Result<Vec<FraudCase>> {
        let mut cases = self.list_by_status(statuses).await?;
        cases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(cases)
    }

    async fn list_by_assignee(&self, assignee: &str) -> Result<Vec<FraudCase>> {
        Ok(self
            .read()
            .cases
            .values()
            .filter(|case| case.assigned_to.as_deref() == Some(assignee))
            .cloned()
            .collect())
    }

    async fn update(&self, mut case: FraudCase) -> Result<FraudCase> {
        let mut inner = self.write();

        let current = inner
            .cases
            .get(&case.case_id)
            .ok_or_else(|| TriageError::CaseNotFound(case.case_id.clone()))?;
        Self::check_transition(current, &case)?;

        case.updated_at = Utc::now();
        case.clamp_scores();
        inner.cases.insert(case.case_id.clone(), case.clone());
        Ok(case)
    }

    async fn update_with(&self, case_id: &str, mutate: MutateFn) -> Result<FraudCase> {
        let mut inner = self.write();

        let current = inner
            .cases
            .get(case_id)
            .ok_or_else(|| TriageError::CaseNotFound(case_id.to_string()))?;

        // Mutate a copy; nothing is visible until the transition validates.
        let mut next = current.clone();
        mutate(&mut next)?;
        Self::check_transition(current, &next)?;

        next.updated_at = Utc::now();
        next.clamp_scores();
        inner.cases.insert(case_id.to_string(), next.clone());
        Ok(next)
    }

    async fn stats(&self) -> Result<HashMap<CaseStatus, u64>> {
        let mut counts = HashMap::new();
        for case in self.read().cases.values() {
            *counts.entry(case.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
