//! Shared rule store.
//!
//! The rules live in a casbin [`Enforcer`] behind an async read/write lock.
//! Writers are serialized by a separate gate and persist through the
//! [`PolicyAdapter`] (bounded by a deadline) before they take the write lock,
//! so a slow backend never stalls enforcement. A whole batch is applied under
//! one write guard: a reader sees every mutation of a batch or none of them.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use casbin::{CoreApi, Enforcer, MgmtApi};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, warn};

use crate::adapter::PolicyAdapter;
use crate::error::PolicyError;
use crate::model::EnforcementModel;
use crate::rule::{Mutation, PolicyRule, RoleGroupingFact, StoredRule};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(2);

pub struct PolicyStore {
    enforcer: RwLock<Enforcer>,
    model: EnforcementModel,
    adapter: Arc<dyn PolicyAdapter>,
    write_gate: tokio::sync::Mutex<()>,
    deadline: Duration,
}

impl core::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("model", &self.model.object_match())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl PolicyStore {
    /// Compile `model` and load the initial rules from `adapter`.
    pub async fn open(
        model: EnforcementModel,
        adapter: Arc<dyn PolicyAdapter>,
        deadline: Duration,
    ) -> Result<Self, PolicyError> {
        let rules = within(deadline, "load", adapter.load()).await?;
        let rules: Vec<StoredRule> = rules.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let enforcer = build_enforcer(&model, &rules).await?;
        info!(rules = rules.len(), "policy store loaded");

        Ok(Self {
            enforcer: RwLock::new(enforcer),
            model,
            adapter,
            write_gate: tokio::sync::Mutex::new(()),
            deadline,
        })
    }

    pub fn model(&self) -> &EnforcementModel {
        &self.model
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Shared view of the enforcer. Every answer taken from one guard comes
    /// from the same rule set.
    pub async fn read(&self) -> RwLockReadGuard<'_, Enforcer> {
        self.enforcer.read().await
    }

    /// Every rule currently loaded, policies first.
    pub async fn rules(&self) -> Vec<StoredRule> {
        rules_of(&*self.enforcer.read().await)
    }

    /// Apply `mutations` as one atomic batch.
    ///
    /// Returns, per mutation, whether it changed the set. Nothing becomes
    /// visible if persistence fails.
    pub async fn apply(&self, mutations: &[Mutation], deadline: Duration) -> Result<Vec<bool>, PolicyError> {
        for mutation in mutations {
            mutation.rule().validate()?;
        }

        let _gate = self.write_gate.lock().await;

        let mut next: BTreeSet<StoredRule> = self.rules().await.into_iter().collect();
        let changed: Vec<bool> = mutations
            .iter()
            .map(|m| match m {
                Mutation::Add(rule) => next.insert(rule.clone()),
                Mutation::Remove(rule) => next.remove(rule),
            })
            .collect();
        let effective: Vec<&Mutation> = mutations
            .iter()
            .zip(&changed)
            .filter_map(|(m, c)| c.then_some(m))
            .collect();

        match effective.as_slice() {
            [] => return Ok(changed),
            [Mutation::Add(rule)] => within(deadline, "add_rule", self.adapter.add_rule(rule)).await?,
            [Mutation::Remove(rule)] => {
                within(deadline, "remove_rule", self.adapter.remove_rule(rule)).await?
            }
            _ => {
                let rules: Vec<StoredRule> = next.iter().cloned().collect();
                within(deadline, "save", self.adapter.save(&rules)).await?
            }
        }

        let mut enforcer = self.enforcer.write().await;
        if let Err(err) = apply_all(&mut *enforcer, &effective).await {
            // Persisted already; rebuild from the persisted view.
            warn!(error = %err, "incremental policy update failed, rebuilding enforcer");
            let rules: Vec<StoredRule> = next.into_iter().collect();
            *enforcer = build_enforcer(&self.model, &rules).await?;
        }
        Ok(changed)
    }

    /// Replace the in-memory rules with whatever the adapter currently holds.
    ///
    /// On failure the previous rules stay in place.
    pub async fn reload(&self, deadline: Duration) -> Result<usize, PolicyError> {
        let _gate = self.write_gate.lock().await;
        let rules = within(deadline, "load", self.adapter.load()).await?;
        let rules: Vec<StoredRule> = rules.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let fresh = build_enforcer(&self.model, &rules).await?;

        *self.enforcer.write().await = fresh;
        info!(rules = rules.len(), "policy store reloaded");
        Ok(rules.len())
    }

    /// Persist the full in-memory rule set through the adapter.
    pub async fn save(&self, deadline: Duration) -> Result<(), PolicyError> {
        let _gate = self.write_gate.lock().await;
        let rules = self.rules().await;
        within(deadline, "save", self.adapter.save(&rules)).await
    }
}

pub(crate) fn rules_of(enforcer: &Enforcer) -> Vec<StoredRule> {
    let policies = enforcer
        .get_policy()
        .into_iter()
        .filter_map(|row| PolicyRule::from_params(&row))
        .map(StoredRule::Policy);
    let groupings = enforcer
        .get_grouping_policy()
        .into_iter()
        .filter_map(|row| RoleGroupingFact::from_params(&row))
        .map(StoredRule::Grouping);
    policies.chain(groupings).collect()
}

pub(crate) async fn build_enforcer(model: &EnforcementModel, rules: &[StoredRule]) -> Result<Enforcer, PolicyError> {
    let mut enforcer = model.enforcer().await?;
    for rule in rules {
        match rule {
            StoredRule::Policy(p) => enforcer.add_policy(p.to_params()).await?,
            StoredRule::Grouping(g) => enforcer.add_grouping_policy(g.to_params()).await?,
        };
    }
    enforcer.build_role_links()?;
    Ok(enforcer)
}

async fn apply_all(enforcer: &mut Enforcer, mutations: &[&Mutation]) -> Result<(), PolicyError> {
    for mutation in mutations {
        match mutation {
            Mutation::Add(StoredRule::Policy(p)) => enforcer.add_policy(p.to_params()).await?,
            Mutation::Add(StoredRule::Grouping(g)) => enforcer.add_grouping_policy(g.to_params()).await?,
            Mutation::Remove(StoredRule::Policy(p)) => enforcer.remove_policy(p.to_params()).await?,
            Mutation::Remove(StoredRule::Grouping(g)) => {
                enforcer.remove_grouping_policy(g.to_params()).await?
            }
        };
    }
    if mutations.iter().any(|m| matches!(m.rule(), StoredRule::Grouping(_))) {
        enforcer.build_role_links()?;
    }
    Ok(())
}

async fn within<T, F>(deadline: Duration, op: &'static str, fut: F) -> Result<T, PolicyError>
where
    F: core::future::Future<Output = Result<T, crate::error::AdapterError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            warn!(op, error = %err, "policy adapter failed");
            Err(err.into())
        }
        Err(_) => {
            warn!(op, deadline_ms = deadline.as_millis() as u64, "policy adapter deadline exceeded");
            Err(PolicyError::StoreUnavailable(format!("{op} exceeded {deadline:?}")))
        }
    }
}
