//! Prompt templates with `{{name}}` placeholders.
//!
//! Templates are loaded by relative path from a [`PromptStore`] and
//! rendered against a map of values. Unknown or malformed placeholders are
//! left in place verbatim; [`PlaceholderPolicy::Strict`] turns unresolved
//! names into an error instead.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use proto::PromptError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Source of raw template text.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Returns the raw template stored under `path`.
    async fn load(&self, path: &str) -> Result<String, PromptError>;
}

/// Reads templates from files under a root directory.
#[derive(Debug, Clone)]
pub struct FilePromptStore {
    root: PathBuf,
}

impl FilePromptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` under the root, refusing anything that could escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, PromptError> {
        let relative = Path::new(path);
        let escapes = path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(PromptError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl PromptStore for FilePromptStore {
    async fn load(&self, path: &str) -> Result<String, PromptError> {
        let full = self.resolve(path)?;
        debug!(path = %full.display(), "Loading prompt template");
        match tokio::fs::read_to_string(&full).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PromptError::NotFound(path.to_string()))
            }
            Err(e) => Err(PromptError::Io(e)),
        }
    }
}

/// Templates held in memory; handy for tests and embedded defaults.
#[derive(Debug, Default)]
pub struct InMemoryPromptStore {
    templates: RwLock<HashMap<String, String>>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `template` under `path`, replacing any previous one.
    pub fn insert(&self, path: impl Into<String>, template: impl Into<String>) {
        self.templates.write().insert(path.into(), template.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(self, path: impl Into<String>, template: impl Into<String>) -> Self {
        self.insert(path, template);
        self
    }
}

#[async_trait]
impl PromptStore for InMemoryPromptStore {
    async fn load(&self, path: &str) -> Result<String, PromptError> {
        self.templates
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| PromptError::NotFound(path.to_string()))
    }
}

/// What rendering does with placeholders that have no value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderPolicy {
    /// Leave `{{name}}` in the output.
    #[default]
    Lenient,
    /// Fail with [`PromptError::Unresolved`].
    Strict,
}

/// Loads templates from a store and renders them.
#[derive(Clone)]
pub struct PromptTemplate {
    store: Arc<dyn PromptStore>,
    policy: PlaceholderPolicy,
}

impl PromptTemplate {
    pub fn new(store: Arc<dyn PromptStore>) -> Self {
        Self {
            store,
            policy: PlaceholderPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PlaceholderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> PlaceholderPolicy {
        self.policy
    }

    /// Returns the raw template text.
    pub async fn load(&self, path: &str) -> Result<String, PromptError> {
        self.store.load(path).await
    }

    /// Loads `path` and substitutes `placeholders` according to the policy.
    pub async fn render(
        &self,
        path: &str,
        placeholders: &HashMap<String, String>,
    ) -> Result<String, PromptError> {
        let template = self.load(path).await?;
        match self.policy {
            PlaceholderPolicy::Lenient => Ok(substitute(&template, placeholders)),
            PlaceholderPolicy::Strict => substitute_strict(&template, placeholders),
        }
    }
}

/// Replaces every well-formed `{{name}}` that has a value. Everything else,
/// including unknown names and unterminated braces, is copied verbatim.
pub fn substitute(template: &str, placeholders: &HashMap<String, String>) -> String {
    scan(template, |name| placeholders.get(name).cloned())
}

/// Like [`substitute`], but fails listing every name that had no value.
pub fn substitute_strict(
    template: &str,
    placeholders: &HashMap<String, String>,
) -> Result<String, PromptError> {
    let mut missing: Vec<String> = Vec::new();
    let rendered = scan(template, |name| {
        let value = placeholders.get(name).cloned();
        if value.is_none() && !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
        value
    });
    if missing.is_empty() {
        Ok(rendered)
    } else {
        Err(PromptError::Unresolved(missing))
    }
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders_in(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    scan(template, |name| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        None
    });
    names
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Walks `template`, asking `lookup` for each well-formed placeholder name
/// (surrounding whitespace trimmed). `None` keeps the token as written.
fn scan(template: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &rest[start..start + 2 + end + 2];
        let name = after[..end].trim();
        let value = if is_placeholder_name(name) {
            lookup(name)
        } else {
            None
        };
        out.push_str(value.as_deref().unwrap_or(token));
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
