//! Task templates and typed variables.
//!
//! A [`TaskTemplate`] is an immutable, registered description of one
//! AI-backed computation: its prompt with `{name}` placeholders, the
//! variables it requires, the output format it expects and its cache
//! policy. Variables are typed [`TaskValue`]s bound into a
//! [`TaskVariables`] map; required names are checked at registration
//! (against the prompt's placeholders) and again at bind time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tickflow_types::TaskId;

use super::InferenceError;

/// A typed variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskValue {
    /// Free text.
    Text(String),
    /// A number, rendered without trailing zeros.
    Number(f64),
    /// A boolean, rendered as `true`/`false`.
    Flag(bool),
    /// Arbitrary JSON, rendered compactly.
    Json(Value),
}

impl TaskValue {
    /// Renders the value into prompt text.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            Self::Flag(b) => b.to_string(),
            Self::Json(v) => v.to_string(),
        }
    }
}

/// An ordered map of typed variables.
///
/// Ordered so the fingerprint is stable regardless of insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskVariables {
    values: BTreeMap<String, TaskValue>,
}

impl TaskVariables {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: TaskValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Looks up a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TaskValue> {
        self.values.get(name)
    }

    /// Returns `true` if `name` is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Stable hash of the bound values, used in cache keys.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (name, value) in &self.values {
            name.hash(&mut hasher);
            value.render().hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// How the provider's response should be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// A JSON object, possibly wrapped in prose or code fences.
    Structured,
    /// Markdown sections under `#`-style headings.
    Sectioned,
    /// Free text.
    Narrative,
}

/// An immutable, registered inference task description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Stable id derived from the template name.
    pub id: TaskId,
    /// Category, used for batching and cache volatility.
    pub category: String,
    /// Prompt text with `{name}` placeholders.
    pub prompt: String,
    /// Variables that must be bound.
    pub required: Vec<String>,
    /// Variables that may be bound; unbound ones render empty.
    pub optional: Vec<String>,
    /// Provider model to prefer, falling back to the default.
    pub preferred_model: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Expected response shape.
    pub format: OutputFormat,
    /// Whether outcomes may be cached.
    pub cacheable: bool,
    /// Base TTL before adaptive adjustment.
    pub cache_ttl: Duration,
    /// Rough cost estimate, in provider milliseconds.
    pub estimated_cost: Duration,
}

impl TaskTemplate {
    /// Creates a template with defaults: narrative output, cacheable,
    /// 60s base TTL.
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: TaskId::named(name),
            category: category.into(),
            prompt: prompt.into(),
            required: Vec::new(),
            optional: Vec::new(),
            preferred_model: None,
            temperature: 0.7,
            format: OutputFormat::Narrative,
            cacheable: true,
            cache_ttl: Duration::from_secs(60),
            estimated_cost: Duration::from_millis(500),
        }
    }

    /// Declares a required variable.
    #[must_use]
    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Declares an optional variable.
    #[must_use]
    pub fn with_optional(mut self, name: impl Into<String>) -> Self {
        self.optional.push(name.into());
        self
    }

    /// Sets the preferred provider model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }

    /// Sets the expected output format.
    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn with_cache(mut self, cacheable: bool, ttl: Duration) -> Self {
        self.cacheable = cacheable;
        self.cache_ttl = ttl;
        self
    }

    /// Sets the cost estimate.
    #[must_use]
    pub fn with_estimated_cost(mut self, cost: Duration) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Placeholder names appearing in the prompt, in order.
    #[must_use]
    pub fn placeholders(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut rest = self.prompt.as_str();
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    if !name.is_empty()
                        && name
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '_')
                        && !names.contains(&name.to_string())
                    {
                        names.push(name.to_string());
                    }
                    rest = &after[end + 1..];
                }
                None => break,
            }
        }
        names
    }

    /// Checks the template's internal consistency at registration:
    /// every placeholder must be declared required or optional.
    pub fn validate(&self) -> Result<(), InferenceError> {
        for name in self.placeholders() {
            if !self.required.contains(&name) && !self.optional.contains(&name) {
                return Err(InferenceError::UndeclaredPlaceholder {
                    task: self.id.to_string(),
                    name,
                });
            }
        }
        Ok(())
    }

    /// Binds variables into the prompt.
    ///
    /// Fails on any missing required variable; unbound optional
    /// placeholders render empty.
    pub fn bind(&self, variables: &TaskVariables) -> Result<String, InferenceError> {
        for name in &self.required {
            if !variables.contains(name) {
                return Err(InferenceError::MissingVariable {
                    task: self.id.to_string(),
                    name: name.clone(),
                });
            }
        }

        let mut prompt = self.prompt.clone();
        for name in self.placeholders() {
            let rendered = variables
                .get(&name)
                .map(TaskValue::render)
                .unwrap_or_default();
            prompt = prompt.replace(&format!("{{{name}}}"), &rendered);
        }
        Ok(prompt)
    }
}
