//! Authorization explanation (audit trail).
//!
//! Answers "why was this request allowed or denied?" without changing how the
//! decision itself is made: `allowed` always comes from the enforcer, the rest
//! is reconstructed from the loaded rules.

use std::collections::{HashSet, VecDeque};

use casbin::{CoreApi, Enforcer, MgmtApi};
use serde::Serialize;

use warden_core::Domain;

use crate::error::PolicyError;
use crate::model::EnforcementModel;
use crate::rule::{AccessRequest, PolicyRule, RoleGroupingFact};

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub request: AccessRequest,
    pub allowed: bool,
    /// The subject followed by every role it inherits in the request domain.
    pub effective_subjects: Vec<String>,
    pub matched_rule: Option<PolicyRule>,
    pub reason: String,
    pub denial: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// None of the effective subjects has any rule in the domain.
    NoRulesForSubjects,
    /// Some rule covers the object, but for other actions.
    ActionMismatch,
    /// Rules exist for the subjects, none covers the object.
    ObjectMismatch,
}

pub(crate) fn explain(
    enforcer: &Enforcer,
    model: &EnforcementModel,
    request: &AccessRequest,
) -> Result<Explanation, PolicyError> {
    let allowed = enforcer.enforce((
        request.subject.as_str(),
        request.domain.as_str(),
        request.object.as_str(),
        request.action.as_str(),
    ))?;

    let effective_subjects = if model.role_inheritance() {
        let groupings: Vec<RoleGroupingFact> = enforcer
            .get_grouping_policy()
            .iter()
            .filter_map(|row| RoleGroupingFact::from_params(row))
            .collect();
        effective_subjects(&groupings, &request.subject, &request.domain)
    } else {
        vec![request.subject.clone()]
    };

    let candidates: Vec<PolicyRule> = enforcer
        .get_policy()
        .iter()
        .filter_map(|row| PolicyRule::from_params(row))
        .filter(|r| r.domain == request.domain && effective_subjects.contains(&r.subject))
        .collect();

    let matched = candidates
        .iter()
        .find(|r| r.action == request.action && model.object_matches(&r.object, &request.object))
        .cloned();

    if allowed {
        let reason = match &matched {
            Some(rule) if rule.subject == request.subject => {
                format!("rule for '{}' grants {} on '{}'", rule.subject, rule.action, rule.object)
            }
            Some(rule) => format!(
                "inherited role '{}' grants {} on '{}'",
                rule.subject, rule.action, rule.object
            ),
            None => "allowed by the enforcement model".to_string(),
        };
        return Ok(Explanation {
            request: request.clone(),
            allowed: true,
            effective_subjects,
            matched_rule: matched,
            reason,
            denial: None,
        });
    }

    let covering: Vec<&str> = candidates
        .iter()
        .filter(|r| model.object_matches(&r.object, &request.object))
        .map(|r| r.action.as_str())
        .collect();

    let denial = if candidates.is_empty() {
        DenialReason {
            kind: DenialKind::NoRulesForSubjects,
            message: format!(
                "no rule in domain '{}' names any of {:?}",
                request.domain, effective_subjects
            ),
            suggestions: vec![
                format!("Assign '{}' a role in domain '{}'", request.subject, request.domain),
                format!(
                    "Add a rule ({}, {}, {}, {})",
                    request.subject, request.domain, request.object, request.action
                ),
            ],
        }
    } else if !covering.is_empty() {
        DenialReason {
            kind: DenialKind::ActionMismatch,
            message: format!(
                "'{}' is covered only for actions {:?}, not '{}'",
                request.object, covering, request.action
            ),
            suggestions: vec![format!(
                "Add a rule granting '{}' on an object pattern covering '{}'",
                request.action, request.object
            )],
        }
    } else {
        DenialReason {
            kind: DenialKind::ObjectMismatch,
            message: format!("no rule's object pattern covers '{}'", request.object),
            suggestions: vec![format!(
                "Add a rule whose object is '{}' or a prefix pattern ending in '*'",
                request.object
            )],
        }
    };

    Ok(Explanation {
        request: request.clone(),
        allowed: false,
        effective_subjects,
        matched_rule: None,
        reason: denial.message.clone(),
        denial: Some(denial),
    })
}

/// `{subject}` plus every role reachable from it inside `domain`, in
/// breadth-first discovery order. Cycles terminate through the visited set.
fn effective_subjects(groupings: &[RoleGroupingFact], subject: &str, domain: &Domain) -> Vec<String> {
    let mut order = vec![subject.to_string()];
    let mut visited: HashSet<&str> = HashSet::from([subject]);
    let mut queue: VecDeque<&str> = VecDeque::from([subject]);

    while let Some(node) = queue.pop_front() {
        for fact in groupings.iter().filter(|g| &g.domain == domain && g.user == node) {
            if visited.insert(fact.role.as_str()) {
                order.push(fact.role.clone());
                queue.push_back(fact.role.as_str());
            }
        }
    }

    order
}
