//! Enforcement model definition.
//!
//! The model text is handed to casbin as is. Warden only requires the
//! four-field request shape `sub, dom, obj, act`; a model that cannot answer
//! such a request is rejected when the engine opens. The matcher's object
//! function is read off the text so explanations compare objects the same way
//! the enforcer does.

use std::path::Path;

use casbin::function_map::{key_match, key_match2};
use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter};

use crate::error::ModelError;

/// Model shipped with the binary, used when no model file is configured.
pub const DEFAULT_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && keyMatch(r.obj, p.obj) && r.act == p.act
"#;

/// How rule objects are compared with the requested object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ObjectMatch {
    /// `keyMatch`: everything before the first `*` is a prefix.
    KeyMatch,
    /// `keyMatch2`: `*` and `:param` path segments.
    KeyMatch2,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementModel {
    text: String,
    object_match: ObjectMatch,
    role_inheritance: bool,
}

impl Default for EnforcementModel {
    fn default() -> Self {
        Self::from_text(DEFAULT_MODEL)
    }
}

impl EnforcementModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Io(format!("{}: {e}", path.display())))?;
        Ok(Self::from_text(text))
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let matcher = matcher_line(&text).unwrap_or_default();

        let object_match = if matcher.contains("keyMatch2(r.obj") {
            ObjectMatch::KeyMatch2
        } else if matcher.contains("keyMatch(r.obj") {
            ObjectMatch::KeyMatch
        } else {
            ObjectMatch::Exact
        };

        Self {
            role_inheritance: matcher.contains("g(r.sub"),
            object_match,
            text,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn role_inheritance(&self) -> bool {
        self.role_inheritance
    }

    pub fn object_match(&self) -> ObjectMatch {
        self.object_match
    }

    pub fn object_matches(&self, pattern: &str, object: &str) -> bool {
        match self.object_match {
            ObjectMatch::KeyMatch => key_match(object, pattern),
            ObjectMatch::KeyMatch2 => key_match2(object, pattern),
            ObjectMatch::Exact => pattern == object,
        }
    }

    /// Compile into an empty casbin enforcer.
    pub(crate) async fn enforcer(&self) -> Result<Enforcer, ModelError> {
        let model = DefaultModel::from_str(&self.text)
            .await
            .map_err(|e| ModelError::Invalid(e.to_string()))?;
        let enforcer = Enforcer::new(model, MemoryAdapter::default())
            .await
            .map_err(|e| ModelError::Invalid(e.to_string()))?;

        enforcer
            .enforce(("", "", "", ""))
            .map_err(|e| ModelError::Invalid(format!("model does not accept (sub, dom, obj, act): {e}")))?;
        Ok(enforcer)
    }
}

/// Matcher expression with whitespace removed.
fn matcher_line(text: &str) -> Option<String> {
    let mut in_matchers = false;
    for line in text.lines().map(str::trim) {
        if line.starts_with('[') {
            in_matchers = line == "[matchers]";
            continue;
        }
        if !in_matchers {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "m" {
                return Some(value.chars().filter(|c| !c.is_whitespace()).collect());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXACT_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.dom == p.dom && r.obj == p.obj && r.act == p.act
"#;

    #[test]
    fn default_model_uses_roles_and_prefix_objects() {
        let model = EnforcementModel::default();
        assert!(model.role_inheritance());
        assert_eq!(model.object_match(), ObjectMatch::KeyMatch);
        assert!(model.object_matches("/api/*", "/api/clients/1"));
        assert!(model.object_matches("*", "/anything"));
        assert!(!model.object_matches("/api/clients", "/api/clients/1"));
    }

    #[test]
    fn exact_object_model() {
        let model = EnforcementModel::from_text(EXACT_MODEL);
        assert!(!model.role_inheritance());
        assert_eq!(model.object_match(), ObjectMatch::Exact);
        assert!(!model.object_matches("/api/*", "/api/x"));
    }

    #[test]
    fn key_match2_is_detected() {
        let model = EnforcementModel::from_text(DEFAULT_MODEL.replace("keyMatch(", "keyMatch2("));
        assert_eq!(model.object_match(), ObjectMatch::KeyMatch2);
        assert!(model.object_matches("/api/clients/:id", "/api/clients/7"));
    }

    #[tokio::test]
    async fn shipped_models_compile() {
        EnforcementModel::default().enforcer().await.unwrap();
        EnforcementModel::from_text(EXACT_MODEL).enforcer().await.unwrap();
    }

    #[tokio::test]
    async fn three_field_request_shape_is_rejected() {
        let text = EXACT_MODEL
            .replace("r = sub, dom, obj, act", "r = sub, obj, act")
            .replace("p = sub, dom, obj, act", "p = sub, obj, act")
            .replace("r.sub == p.sub && r.dom == p.dom && ", "r.sub == p.sub && ");
        let err = EnforcementModel::from_text(text).enforcer().await.err().expect("expected model error");
        assert!(matches!(err, ModelError::Invalid(_)));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let err = EnforcementModel::from_text("not a model").enforcer().await.err().expect("expected model error");
        assert!(matches!(err, ModelError::Invalid(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EnforcementModel::load("/definitely/not/here.conf").unwrap_err();
        assert!(matches!(err, ModelError::Io(_)));
    }
}
