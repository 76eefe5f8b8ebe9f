//! Persistence capability behind the policy store.
//!
//! The engine never talks to storage directly; it goes through
//! [`PolicyAdapter`]. Two implementations ship here:
//!
//! - [`MemoryAdapter`]: process-local, for tests and dev
//! - [`FileAdapter`]: line-oriented text file (`p, sub, dom, obj, act` /
//!   `g, user, role, dom`), rewritten atomically on save. Fields holding a
//!   comma, a double quote or surrounding blanks are written in double quotes
//!   with inner quotes doubled, so every stored value reads back unchanged.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AdapterError;
use crate::rule::{PolicyRule, RoleGroupingFact, StoredRule};

#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Read every stored rule.
    async fn load(&self) -> Result<Vec<StoredRule>, AdapterError>;

    /// Replace the stored rules with `rules`.
    async fn save(&self, rules: &[StoredRule]) -> Result<(), AdapterError>;

    async fn add_rule(&self, rule: &StoredRule) -> Result<(), AdapterError>;

    async fn remove_rule(&self, rule: &StoredRule) -> Result<(), AdapterError>;
}

/// In-memory adapter (tests/dev).
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    rules: Mutex<BTreeSet<StoredRule>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = StoredRule>) -> Self {
        Self {
            rules: Mutex::new(rules.into_iter().collect()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<StoredRule>>, AdapterError> {
        self.rules
            .lock()
            .map_err(|_| AdapterError::Unavailable("memory adapter lock poisoned".to_string()))
    }
}

#[async_trait]
impl PolicyAdapter for MemoryAdapter {
    async fn load(&self) -> Result<Vec<StoredRule>, AdapterError> {
        Ok(self.lock()?.iter().cloned().collect())
    }

    async fn save(&self, rules: &[StoredRule]) -> Result<(), AdapterError> {
        *self.lock()? = rules.iter().cloned().collect();
        Ok(())
    }

    async fn add_rule(&self, rule: &StoredRule) -> Result<(), AdapterError> {
        self.lock()?.insert(rule.clone());
        Ok(())
    }

    async fn remove_rule(&self, rule: &StoredRule) -> Result<(), AdapterError> {
        self.lock()?.remove(rule);
        Ok(())
    }
}

/// Text-file adapter.
///
/// Writes go through a temp file + rename so a crash never leaves a
/// half-written policy file behind. A missing file loads as an empty set.
#[derive(Debug)]
pub struct FileAdapter {
    path: PathBuf,
    write_gate: tokio::sync::Mutex<()>,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_rules(&self) -> Result<Vec<StoredRule>, AdapterError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => parse_lines(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_rules(&self, rules: &[StoredRule]) -> Result<(), AdapterError> {
        let mut text = String::new();
        for rule in rules {
            text.push_str(&format_line(rule));
            text.push('\n');
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), rules = rules.len(), "policy file written");
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for FileAdapter {
    async fn load(&self) -> Result<Vec<StoredRule>, AdapterError> {
        self.read_rules().await
    }

    async fn save(&self, rules: &[StoredRule]) -> Result<(), AdapterError> {
        let _gate = self.write_gate.lock().await;
        self.write_rules(rules).await
    }

    async fn add_rule(&self, rule: &StoredRule) -> Result<(), AdapterError> {
        let _gate = self.write_gate.lock().await;
        let mut rules = self.read_rules().await?;
        if !rules.contains(rule) {
            rules.push(rule.clone());
            self.write_rules(&rules).await?;
        }
        Ok(())
    }

    async fn remove_rule(&self, rule: &StoredRule) -> Result<(), AdapterError> {
        let _gate = self.write_gate.lock().await;
        let mut rules = self.read_rules().await?;
        let before = rules.len();
        rules.retain(|r| r != rule);
        if rules.len() != before {
            self.write_rules(&rules).await?;
        }
        Ok(())
    }
}

/// Parse the line format used by [`FileAdapter`].
pub fn parse_lines(text: &str) -> Result<Vec<StoredRule>, AdapterError> {
    let mut rules = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields = split_fields(line).map_err(|reason| AdapterError::Parse { line: idx + 1, reason })?;
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        let rule = match fields.as_slice() {
            ["p", sub, dom, obj, act] => StoredRule::Policy(PolicyRule::new(*sub, *dom, *obj, *act)),
            ["g", user, role, dom] => StoredRule::Grouping(RoleGroupingFact::new(*user, *role, *dom)),
            _ => {
                return Err(AdapterError::Parse {
                    line: idx + 1,
                    reason: format!("expected 'p, sub, dom, obj, act' or 'g, user, role, dom', got '{line}'"),
                });
            }
        };
        rules.push(rule);
    }

    Ok(rules)
}

fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}

        let field = if chars.next_if_eq(&'"').is_some() {
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('"') if chars.next_if_eq(&'"').is_some() => value.push('"'),
                    Some('"') => break,
                    Some(c) => value.push(c),
                    None => return Err("unterminated quoted field".to_string()),
                }
            }
            while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}
            if !matches!(chars.peek(), None | Some(',')) {
                return Err("unexpected text after quoted field".to_string());
            }
            value
        } else {
            let mut value = String::new();
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
            value.trim_end().to_string()
        };
        fields.push(field);

        if chars.next().is_none() {
            return Ok(fields);
        }
    }
}

fn format_line(rule: &StoredRule) -> String {
    let fields: Vec<&str> = match rule {
        StoredRule::Policy(p) => vec!["p", p.subject.as_str(), p.domain.as_str(), p.object.as_str(), p.action.as_str()],
        StoredRule::Grouping(g) => vec!["g", g.user.as_str(), g.role.as_str(), g.domain.as_str()],
    };
    fields.into_iter().map(quote_field).collect::<Vec<_>>().join(", ")
}

fn quote_field(value: &str) -> String {
    let plain = !value.is_empty() && value.trim() == value && !value.contains([',', '"']);
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', "\"\""))
    }
}
