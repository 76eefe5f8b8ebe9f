//! Policy enforcement entrypoint.

use std::sync::Arc;
use std::time::Duration;

use casbin::{CoreApi, Enforcer, MgmtApi};
use tracing::{debug, info};

use warden_core::Domain;

use crate::adapter::PolicyAdapter;
use crate::error::PolicyError;
use crate::explain::{self, Explanation};
use crate::model::EnforcementModel;
use crate::rule::{AccessRequest, Mutation, PolicyRule, RoleGroupingFact};
use crate::store::PolicyStore;

/// Domain-scoped RBAC enforcer.
///
/// Decisions are made by casbin over the rules held in [`PolicyStore`];
/// enforcement never touches the adapter. Mutations persist before they
/// become visible.
#[derive(Debug)]
pub struct PolicyEngine {
    store: PolicyStore,
}

impl PolicyEngine {
    pub async fn open(
        model: EnforcementModel,
        adapter: Arc<dyn PolicyAdapter>,
        deadline: Duration,
    ) -> Result<Self, PolicyError> {
        let store = PolicyStore::open(model, adapter, deadline).await?;
        Ok(Self { store })
    }

    pub fn model(&self) -> &EnforcementModel {
        self.store.model()
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Is `subject` allowed to perform `action` on `object` in `domain`?
    ///
    /// An error means the enforcer could not evaluate the request; callers
    /// must treat it as a denial.
    pub async fn enforce(
        &self,
        subject: &str,
        domain: &Domain,
        object: &str,
        action: &str,
    ) -> Result<bool, PolicyError> {
        self.enforce_request(&AccessRequest::new(subject, domain.clone(), object, action))
            .await
    }

    pub async fn enforce_request(&self, request: &AccessRequest) -> Result<bool, PolicyError> {
        let enforcer = self.store.read().await;
        decide(&enforcer, request)
    }

    /// Decide several requests against one view of the rules.
    pub async fn enforce_all(&self, requests: &[AccessRequest]) -> Result<Vec<bool>, PolicyError> {
        let enforcer = self.store.read().await;
        requests.iter().map(|r| decide(&enforcer, r)).collect()
    }

    pub async fn explain(&self, request: &AccessRequest) -> Result<Explanation, PolicyError> {
        let enforcer = self.store.read().await;
        explain::explain(&enforcer, self.store.model(), request)
    }

    pub async fn add_policy(&self, rule: PolicyRule) -> Result<bool, PolicyError> {
        self.single(Mutation::add_policy(rule)).await
    }

    pub async fn remove_policy(&self, rule: PolicyRule) -> Result<bool, PolicyError> {
        self.single(Mutation::remove_policy(rule)).await
    }

    pub async fn add_role_for_user(&self, user: &str, role: &str, domain: &Domain) -> Result<bool, PolicyError> {
        self.single(Mutation::add_grouping(RoleGroupingFact::new(user, role, domain.clone())))
            .await
    }

    pub async fn delete_role_for_user(&self, user: &str, role: &str, domain: &Domain) -> Result<bool, PolicyError> {
        self.single(Mutation::remove_grouping(RoleGroupingFact::new(user, role, domain.clone())))
            .await
    }

    /// Apply several mutations so that no reader observes a partial result.
    pub async fn apply(&self, mutations: &[Mutation]) -> Result<Vec<bool>, PolicyError> {
        self.apply_within(mutations, self.store.deadline()).await
    }

    pub async fn apply_within(&self, mutations: &[Mutation], deadline: Duration) -> Result<Vec<bool>, PolicyError> {
        let changed = self.store.apply(mutations, deadline).await?;
        info!(
            requested = mutations.len(),
            changed = changed.iter().filter(|c| **c).count(),
            "policy mutations applied"
        );
        Ok(changed)
    }

    async fn single(&self, mutation: Mutation) -> Result<bool, PolicyError> {
        let changed = self.apply(std::slice::from_ref(&mutation)).await?;
        Ok(changed.first().copied().unwrap_or(false))
    }

    /// Roles directly assigned to `user` in `domain`.
    pub async fn roles_for_user(&self, user: &str, domain: &Domain) -> Vec<String> {
        self.groupings()
            .await
            .into_iter()
            .filter(|g| &g.domain == domain && g.user == user)
            .map(|g| g.role)
            .collect()
    }

    /// Users directly holding `role` in `domain`.
    pub async fn users_for_role(&self, role: &str, domain: &Domain) -> Vec<String> {
        self.groupings()
            .await
            .into_iter()
            .filter(|g| &g.domain == domain && g.role == role)
            .map(|g| g.user)
            .collect()
    }

    pub async fn policies(&self) -> Vec<PolicyRule> {
        let enforcer = self.store.read().await;
        enforcer
            .get_policy()
            .iter()
            .filter_map(|row| PolicyRule::from_params(row))
            .collect()
    }

    pub async fn groupings(&self) -> Vec<RoleGroupingFact> {
        let enforcer = self.store.read().await;
        enforcer
            .get_grouping_policy()
            .iter()
            .filter_map(|row| RoleGroupingFact::from_params(row))
            .collect()
    }

    pub async fn reload(&self) -> Result<usize, PolicyError> {
        self.store.reload(self.store.deadline()).await
    }

    pub async fn save(&self) -> Result<(), PolicyError> {
        self.store.save(self.store.deadline()).await
    }
}

fn decide(enforcer: &Enforcer, request: &AccessRequest) -> Result<bool, PolicyError> {
    let allowed = enforcer.enforce((
        request.subject.as_str(),
        request.domain.as_str(),
        request.object.as_str(),
        request.action.as_str(),
    ))?;
    debug!(
        subject = %request.subject,
        domain = %request.domain,
        object = %request.object,
        action = %request.action,
        allowed,
        "policy enforced"
    );
    Ok(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::error::AdapterError;
    use crate::rule::StoredRule;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DEADLINE: Duration = Duration::from_millis(500);

    async fn engine_with(adapter: Arc<dyn PolicyAdapter>) -> PolicyEngine {
        PolicyEngine::open(EnforcementModel::default(), adapter, DEADLINE)
            .await
            .unwrap()
    }

    async fn engine() -> PolicyEngine {
        engine_with(Arc::new(MemoryAdapter::new())).await
    }

    async fn seeded(rules: Vec<StoredRule>) -> PolicyEngine {
        engine_with(Arc::new(MemoryAdapter::with_rules(rules))).await
    }

    fn p(sub: &str, dom: &str, obj: &str, act: &str) -> StoredRule {
        StoredRule::Policy(PolicyRule::new(sub, dom, obj, act))
    }

    fn g(user: &str, role: &str, dom: &str) -> StoredRule {
        StoredRule::Grouping(RoleGroupingFact::new(user, role, dom))
    }

    /// Adapter that can be switched off, or made to hang.
    #[derive(Default)]
    struct FlakyAdapter {
        inner: MemoryAdapter,
        down: AtomicBool,
        hang: AtomicBool,
    }

    impl FlakyAdapter {
        async fn gate(&self) -> Result<(), AdapterError> {
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(AdapterError::Unavailable("down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PolicyAdapter for FlakyAdapter {
        async fn load(&self) -> Result<Vec<StoredRule>, AdapterError> {
            self.gate().await?;
            self.inner.load().await
        }
        async fn save(&self, rules: &[StoredRule]) -> Result<(), AdapterError> {
            self.gate().await?;
            self.inner.save(rules).await
        }
        async fn add_rule(&self, rule: &StoredRule) -> Result<(), AdapterError> {
            self.gate().await?;
            self.inner.add_rule(rule).await
        }
        async fn remove_rule(&self, rule: &StoredRule) -> Result<(), AdapterError> {
            self.gate().await?;
            self.inner.remove_rule(rule).await
        }
    }

    #[tokio::test]
    async fn admin_role_grants_get_but_not_delete() {
        let e = engine().await;
        assert!(e.add_policy(PolicyRule::new("admin", "default", "/api/*", "GET")).await.unwrap());
        assert!(e.add_role_for_user("alice", "admin", &Domain::DEFAULT).await.unwrap());

        assert!(e.enforce("alice", &Domain::DEFAULT, "/api/clients", "GET").await.unwrap());
        assert!(!e.enforce("alice", &Domain::DEFAULT, "/api/clients", "DELETE").await.unwrap());
    }

    #[tokio::test]
    async fn roles_do_not_leak_across_domains() {
        let e = seeded(vec![
            p("admin", "tenant-a", "/api/*", "GET"),
            p("admin", "tenant-b", "/api/*", "GET"),
            g("alice", "admin", "tenant-a"),
        ])
        .await;
        assert!(e.enforce("alice", &Domain::from("tenant-a"), "/api/x", "GET").await.unwrap());
        assert!(!e.enforce("alice", &Domain::from("tenant-b"), "/api/x", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn inheritance_is_transitive() {
        let e = seeded(vec![
            g("u", "r1", "d"),
            g("r1", "r2", "d"),
            g("r2", "r3", "d"),
            p("r3", "d", "/reports", "GET"),
        ])
        .await;
        assert!(e.enforce("u", &Domain::from("d"), "/reports", "GET").await.unwrap());

        let why = e.explain(&AccessRequest::new("u", "d", "/reports", "GET")).await.unwrap();
        assert_eq!(why.effective_subjects, vec!["u", "r1", "r2", "r3"]);
    }

    #[tokio::test]
    async fn cyclic_groupings_terminate() {
        let e = seeded(vec![
            g("a", "b", "d"),
            g("b", "c", "d"),
            g("c", "a", "d"),
            p("c", "d", "/x", "GET"),
        ])
        .await;
        assert!(e.enforce("a", &Domain::from("d"), "/x", "GET").await.unwrap());
        assert!(!e.enforce("a", &Domain::from("d"), "/y", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn literal_identity_rules_apply_without_roles() {
        let e = seeded(vec![p("svc", "api", "/api/*", "GET")]).await;
        assert!(e.enforce("svc", &Domain::API, "/api/users", "GET").await.unwrap());
        assert!(!e.enforce("svc", &Domain::DEFAULT, "/api/users", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_stored_rules_load_once() {
        let e = seeded(vec![p("a", "d", "/x", "GET"), p("a", "d", "/x", "GET")]).await;
        assert_eq!(e.policies().await.len(), 1);
    }

    #[tokio::test]
    async fn mutations_report_whether_anything_changed() {
        let e = engine().await;
        let rule = PolicyRule::new("admin", "default", "/api/*", "GET");
        assert!(e.add_policy(rule.clone()).await.unwrap());
        assert!(!e.add_policy(rule.clone()).await.unwrap());
        assert!(e.remove_policy(rule.clone()).await.unwrap());
        assert!(!e.remove_policy(rule).await.unwrap());

        assert!(!e.delete_role_for_user("bob", "admin", &Domain::DEFAULT).await.unwrap());
        assert!(e.add_role_for_user("bob", "admin", &Domain::DEFAULT).await.unwrap());
        assert!(!e.add_role_for_user("bob", "admin", &Domain::DEFAULT).await.unwrap());
        assert_eq!(e.roles_for_user("bob", &Domain::DEFAULT).await, vec!["admin"]);
        assert_eq!(e.users_for_role("admin", &Domain::DEFAULT).await, vec!["bob"]);
    }

    #[tokio::test]
    async fn removing_grouping_cuts_inheritance() {
        let e = seeded(vec![g("alice", "admin", "default"), p("admin", "default", "*", "GET")]).await;
        assert!(e.enforce("alice", &Domain::DEFAULT, "/anything", "GET").await.unwrap());
        assert!(e.delete_role_for_user("alice", "admin", &Domain::DEFAULT).await.unwrap());
        assert!(!e.enforce("alice", &Domain::DEFAULT, "/anything", "GET").await.unwrap());
        assert!(e.roles_for_user("alice", &Domain::DEFAULT).await.is_empty());
    }

    #[tokio::test]
    async fn fields_that_cannot_round_trip_are_rejected() {
        let adapter = Arc::new(MemoryAdapter::new());
        let e = engine_with(adapter.clone()).await;

        for rule in [
            PolicyRule::new("x\ny", "default", "/x", "GET"),
            PolicyRule::new(" bob", "default", "/x", "GET"),
            PolicyRule::new("bob", "default", "/x\r", "GET"),
            PolicyRule::new("bob", "default", "/x", ""),
        ] {
            let err = e.add_policy(rule).await.unwrap_err();
            assert!(matches!(err, PolicyError::InvalidRule(_)), "{err:?}");
        }
        let err = e.add_role_for_user("carol", "admin\n", &Domain::DEFAULT).await.unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule(_)));

        assert!(e.policies().await.is_empty());
        assert!(adapter.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_remove_round_trip_restores_decision() {
        let e = engine().await;
        let before = e.enforce("carol", &Domain::DEFAULT, "/reports/1", "GET").await.unwrap();
        let rule = PolicyRule::new("carol", "default", "/reports/*", "GET");
        e.add_policy(rule.clone()).await.unwrap();
        assert!(e.enforce("carol", &Domain::DEFAULT, "/reports/1", "GET").await.unwrap());
        e.remove_policy(rule).await.unwrap();
        assert_eq!(e.enforce("carol", &Domain::DEFAULT, "/reports/1", "GET").await.unwrap(), before);
    }

    #[tokio::test]
    async fn mutations_are_persisted_through_the_adapter() {
        let adapter = Arc::new(MemoryAdapter::new());
        let e = engine_with(adapter.clone()).await;
        e.add_policy(PolicyRule::new("admin", "default", "*", "GET")).await.unwrap();
        e.apply(&[
            Mutation::add_grouping(RoleGroupingFact::new("a", "admin", "default")),
            Mutation::add_grouping(RoleGroupingFact::new("b", "admin", "default")),
        ])
        .await
        .unwrap();
        assert_eq!(adapter.load().await.unwrap().len(), 3);

        let fresh = engine_with(adapter).await;
        assert!(fresh.enforce("b", &Domain::DEFAULT, "/x", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn reload_picks_up_external_changes() {
        let adapter = Arc::new(MemoryAdapter::new());
        let e = engine_with(adapter.clone()).await;
        adapter
            .save(&[p("ops", "default", "/ops/*", "GET"), g("dave", "ops", "default")])
            .await
            .unwrap();

        assert!(!e.enforce("dave", &Domain::DEFAULT, "/ops/1", "GET").await.unwrap());
        assert_eq!(e.reload().await.unwrap(), 2);
        assert!(e.enforce("dave", &Domain::DEFAULT, "/ops/1", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn failed_persistence_leaves_decisions_untouched() {
        let adapter = Arc::new(FlakyAdapter::default());
        let e = engine_with(adapter.clone()).await;
        adapter.down.store(true, Ordering::SeqCst);

        let err = e
            .add_policy(PolicyRule::new("x", "default", "/x", "GET"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::StoreUnavailable(_)));
        assert!(!e.enforce("x", &Domain::DEFAULT, "/x", "GET").await.unwrap());

        assert!(e.reload().await.is_err());
        assert!(e.policies().await.is_empty());
    }

    #[tokio::test]
    async fn hung_backend_hits_the_deadline() {
        let adapter = Arc::new(FlakyAdapter::default());
        let e = engine_with(adapter.clone()).await;
        adapter.hang.store(true, Ordering::SeqCst);

        let started = std::time::Instant::now();
        let err = e
            .apply_within(
                &[Mutation::add_policy(PolicyRule::new("x", "default", "/x", "GET"))],
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::StoreUnavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn hung_backend_does_not_block_enforcement() {
        let adapter = Arc::new(FlakyAdapter::default());
        let e = Arc::new(engine_with(adapter.clone()).await);
        e.add_policy(PolicyRule::new("x", "default", "/x", "GET")).await.unwrap();
        adapter.hang.store(true, Ordering::SeqCst);

        let writer = {
            let e = e.clone();
            tokio::spawn(async move {
                e.apply_within(
                    &[Mutation::add_policy(PolicyRule::new("y", "default", "/y", "GET"))],
                    Duration::from_secs(2),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let decided = tokio::time::timeout(
            Duration::from_millis(200),
            e.enforce("x", &Domain::DEFAULT, "/x", "GET"),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(decided);
        assert!(writer.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn paired_rotation_is_atomic_for_readers() {
        let e = Arc::new(engine().await);
        let old = PolicyRule::new("client-old", "api", "/api/*", "GET");
        let new = PolicyRule::new("client-new", "api", "/api/*", "GET");
        e.add_policy(old.clone()).await.unwrap();

        let reader = {
            let e = e.clone();
            tokio::spawn(async move {
                let requests = [
                    AccessRequest::new("client-old", Domain::API, "/api/x", "GET"),
                    AccessRequest::new("client-new", Domain::API, "/api/x", "GET"),
                ];
                for _ in 0..2_000 {
                    let decided = e.enforce_all(&requests).await.unwrap();
                    assert!(decided[0] ^ decided[1], "a view holds exactly one of the paired rules");
                    tokio::task::yield_now().await;
                }
            })
        };

        e.apply(&[Mutation::remove_policy(old), Mutation::add_policy(new)])
            .await
            .unwrap();
        reader.await.unwrap();

        let subjects: Vec<String> = e.policies().await.into_iter().map(|p| p.subject).collect();
        assert_eq!(subjects, vec!["client-new"]);
    }

    #[tokio::test]
    async fn concurrent_readers_and_writers() {
        let e = Arc::new(engine().await);
        e.add_policy(PolicyRule::new("reader", "default", "/data/*", "GET"))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let e = e.clone();
            tasks.push(tokio::spawn(async move {
                let user = format!("u{i}");
                e.add_role_for_user(&user, "reader", &Domain::DEFAULT).await.unwrap();
                assert!(e.enforce(&user, &Domain::DEFAULT, "/data/1", "GET").await.unwrap());
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(e.users_for_role("reader", &Domain::DEFAULT).await.len(), 8);
    }

    fn block_on<F: core::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn role_rules_grant_every_member(
            user in "[a-z]{1,8}",
            role in "[A-Z]{1,8}",
            obj in "/[a-z]{1,8}",
            act in "(GET|POST|PUT|DELETE)",
        ) {
            let allowed = block_on(async {
                let e = seeded(vec![g(&user, &role, "d"), p(&role, "d", &obj, &act)]).await;
                e.enforce(&user, &Domain::from("d"), &obj, &act).await.unwrap()
            });
            prop_assert!(allowed);
        }

        #[test]
        fn empty_rules_deny_everything(
            sub in "[a-z]{1,8}",
            obj in "/[a-z/]{0,16}",
            act in "[A-Z]{1,6}",
        ) {
            let allowed = block_on(async {
                engine().await.enforce(&sub, &Domain::DEFAULT, &obj, &act).await.unwrap()
            });
            prop_assert!(!allowed);
        }

        #[test]
        fn add_then_remove_restores_decision(
            existing in proptest::collection::vec(("[a-c]", "/[a-c]{1,2}\\*?", "(GET|POST)"), 0..6),
            added in ("[a-c]", "/[a-c]{1,2}\\*?", "(GET|POST)"),
            asked in ("[a-c]", "/[a-c]{1,3}", "(GET|POST)"),
        ) {
            let (before, after) = block_on(async {
                let e = seeded(existing.iter().map(|(a, b, c)| p(a, "d", b, c)).collect()).await;
                let request = AccessRequest::new(asked.0.clone(), "d", asked.1.clone(), asked.2.clone());
                let before = e.enforce_request(&request).await.unwrap();

                let rule = PolicyRule::new(added.0.clone(), "d", added.1.clone(), added.2.clone());
                if e.add_policy(rule.clone()).await.unwrap() {
                    e.remove_policy(rule).await.unwrap();
                }
                (before, e.enforce_request(&request).await.unwrap())
            });
            prop_assert_eq!(before, after);
        }
    }
}
