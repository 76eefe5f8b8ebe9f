//! `warden-policy`: domain-scoped RBAC enforcement.
//!
//! - [`model`]: the casbin model text and how it compares objects
//! - [`rule`]: policy rules, role-grouping facts and field validation
//! - [`adapter`]: persistence capability ([`PolicyAdapter`]) with memory and file backends
//! - [`store`]: the casbin enforcer behind a lock, with deadline-bounded persistence
//! - [`engine`]: [`PolicyEngine`], the enforcement entrypoint
//!
//! The engine is an explicitly constructed value. There is no process-wide
//! enforcer; callers share it as `Arc<PolicyEngine>`.

pub mod adapter;
pub mod engine;
pub mod error;
pub mod explain;
pub mod model;
pub mod rule;
pub mod store;

pub use adapter::{FileAdapter, MemoryAdapter, PolicyAdapter};
pub use engine::PolicyEngine;
pub use error::{AdapterError, InvalidField, ModelError, PolicyError};
pub use explain::{DenialKind, Explanation};
pub use model::{EnforcementModel, ObjectMatch};
pub use rule::{validate_field, AccessRequest, Mutation, PolicyRule, RoleGroupingFact, StoredRule};
pub use store::PolicyStore;
