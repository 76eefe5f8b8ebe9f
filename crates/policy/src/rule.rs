//! Policy rules, role-grouping facts and their casbin encodings.

use serde::{Deserialize, Serialize};

use warden_core::Domain;

use crate::error::InvalidField;

/// An explicit allow tuple `(subject, domain, object, action)`.
///
/// `subject` is either a literal identity or a role name; the engine does not
/// distinguish the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub domain: Domain,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        domain: impl Into<Domain>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    pub fn validate(&self) -> Result<(), InvalidField> {
        validate_field("subject", &self.subject)?;
        validate_field("domain", self.domain.as_str())?;
        validate_field("object", &self.object)?;
        validate_field("action", &self.action)
    }

    pub(crate) fn to_params(&self) -> Vec<String> {
        vec![
            self.subject.clone(),
            self.domain.to_string(),
            self.object.clone(),
            self.action.clone(),
        ]
    }

    pub(crate) fn from_params(row: &[String]) -> Option<Self> {
        match row {
            [sub, dom, obj, act] => Some(Self::new(sub.clone(), dom.clone(), obj.clone(), act.clone())),
            _ => None,
        }
    }
}

/// "`user` has `role` in `domain`": one edge of the inheritance graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleGroupingFact {
    pub user: String,
    pub role: String,
    pub domain: Domain,
}

impl RoleGroupingFact {
    pub fn new(user: impl Into<String>, role: impl Into<String>, domain: impl Into<Domain>) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }

    pub fn validate(&self) -> Result<(), InvalidField> {
        validate_field("user", &self.user)?;
        validate_field("role", &self.role)?;
        validate_field("domain", self.domain.as_str())
    }

    pub(crate) fn to_params(&self) -> Vec<String> {
        vec![self.user.clone(), self.role.clone(), self.domain.to_string()]
    }

    pub(crate) fn from_params(row: &[String]) -> Option<Self> {
        match row {
            [user, role, dom] => Some(Self::new(user.clone(), role.clone(), dom.clone())),
            _ => None,
        }
    }
}

/// Anything a [`crate::PolicyAdapter`] persists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRule {
    Policy(PolicyRule),
    Grouping(RoleGroupingFact),
}

impl StoredRule {
    pub fn validate(&self) -> Result<(), InvalidField> {
        match self {
            StoredRule::Policy(p) => p.validate(),
            StoredRule::Grouping(g) => g.validate(),
        }
    }
}

/// A single change to the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Add(StoredRule),
    Remove(StoredRule),
}

impl Mutation {
    pub fn add_policy(rule: PolicyRule) -> Self {
        Mutation::Add(StoredRule::Policy(rule))
    }

    pub fn remove_policy(rule: PolicyRule) -> Self {
        Mutation::Remove(StoredRule::Policy(rule))
    }

    pub fn add_grouping(fact: RoleGroupingFact) -> Self {
        Mutation::Add(StoredRule::Grouping(fact))
    }

    pub fn remove_grouping(fact: RoleGroupingFact) -> Self {
        Mutation::Remove(StoredRule::Grouping(fact))
    }

    pub fn rule(&self) -> &StoredRule {
        match self {
            Mutation::Add(rule) | Mutation::Remove(rule) => rule,
        }
    }
}

/// The enforcement question: may `subject` perform `action` on `object` in `domain`?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub subject: String,
    pub domain: Domain,
    pub object: String,
    pub action: String,
}

impl AccessRequest {
    pub fn new(
        subject: impl Into<String>,
        domain: impl Into<Domain>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
        }
    }
}

/// Check one identity, role, domain, object or action string.
///
/// Empty values, control characters and surrounding whitespace are refused:
/// none of them survive a trip through a line-oriented policy file.
pub fn validate_field(field: &'static str, value: &str) -> Result<(), InvalidField> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.chars().any(char::is_control) {
        "must not contain control characters"
    } else if value.trim() != value {
        "must not start or end with whitespace"
    } else {
        return Ok(());
    };
    Err(InvalidField { field, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_line_breaking_and_padded_values() {
        for bad in ["", "x\ny", "x\ry", "tab\there", " bob", "bob ", "\u{7f}"] {
            assert!(validate_field("user", bad).is_err(), "{bad:?} accepted");
        }
        for good in ["bob", "/api/*", "a b", "x,y", "\"quoted\"", "ünï"] {
            validate_field("user", good).unwrap();
        }
    }

    #[test]
    fn rule_validation_names_the_field() {
        let err = PolicyRule::new("admin", "default", "/api\n", "GET").validate().unwrap_err();
        assert_eq!(err.field, "object");

        let err = RoleGroupingFact::new("alice", " admin", "default").validate().unwrap_err();
        assert_eq!(err.field, "role");
    }

    #[test]
    fn params_match_the_casbin_row_shapes() {
        let rule = PolicyRule::new("admin", "default", "/api/*", "GET");
        assert_eq!(PolicyRule::from_params(&rule.to_params()), Some(rule));

        let fact = RoleGroupingFact::new("alice", "admin", "default");
        assert_eq!(RoleGroupingFact::from_params(&fact.to_params()), Some(fact));

        assert!(PolicyRule::from_params(&["a".to_string()]).is_none());
    }

    proptest! {
        #[test]
        fn printable_trimmed_values_are_accepted(value in "[!-~]([ -~]{0,16}[!-~])?") {
            prop_assert!(validate_field("object", &value).is_ok());
        }
    }
}
