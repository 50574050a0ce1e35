//! The inference engine: template registry, providers and parsing.
//!
//! ```text
//! TaskRequest ──bind──► prompt ──provider──► raw text ──parse──► TaskOutcome
//!                        │                                          ▲
//!                        └── preferred model, else default provider ┘
//! ```

use super::template::{OutputFormat, TaskTemplate, TaskVariables};
use super::InferenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickflow_event::GameEvent;
use tickflow_types::{EntityId, Priority, SystemId, TaskId, TickId};
use tracing::{debug, warn};

/// Entity situation baked into cache keys, so entities in
/// materially different situations never share a cached result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFingerprint {
    /// The entity.
    pub id: EntityId,
    /// Population at request time.
    pub population: u64,
    /// Economic power at request time.
    pub economic_power: f64,
}

/// One inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// The registered template to run.
    pub task: TaskId,
    /// Bound variables.
    pub variables: TaskVariables,
    /// Requester priority, the base of the scheduling score.
    pub priority: Priority,
    /// The system that issued the request.
    pub requester: SystemId,
    /// The tick the request belongs to; part of the cache key.
    pub tick: TickId,
    /// Entity scope, when issued from a Tier-1 invocation.
    pub entity: Option<EntityFingerprint>,
}

impl TaskRequest {
    /// Creates a tick-scoped request.
    #[must_use]
    pub fn new(task: TaskId, variables: TaskVariables, requester: SystemId, tick: TickId) -> Self {
        Self {
            task,
            variables,
            priority: Priority::Medium,
            requester,
            tick,
            entity: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Scopes the request to an entity.
    #[must_use]
    pub fn for_entity(mut self, entity: EntityFingerprint) -> Self {
        self.entity = Some(entity);
        self
    }
}

/// Whether parsing recovered the expected shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseStatus {
    /// The response matched the expected format.
    Parsed,
    /// Best-effort parsing failed; the raw text is still available.
    Failed,
}

/// The parsed response, per the template's [`OutputFormat`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParsedOutput {
    /// A JSON object extracted from the response.
    Structured(Value),
    /// Markdown sections, keyed by heading.
    Sectioned(BTreeMap<String, String>),
    /// Free text.
    Narrative(String),
    /// Parsing failed; the raw response is preserved.
    Failed {
        /// The unparseable response.
        raw: String,
    },
}

impl ParsedOutput {
    /// Parse status of this output.
    #[must_use]
    pub fn status(&self) -> ParseStatus {
        match self {
            Self::Failed { .. } => ParseStatus::Failed,
            _ => ParseStatus::Parsed,
        }
    }
}

/// What one inference run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// The template that ran.
    pub task: TaskId,
    /// Whether a usable result was produced.
    pub success: bool,
    /// The provider's raw response.
    pub raw: String,
    /// The parsed response.
    pub parsed: ParsedOutput,
    /// Result quality, 0-1. Never exceeds the ceiling of the
    /// fallback level that produced it.
    pub quality: f64,
    /// Confidence in the parse, 0-1.
    pub confidence: f64,
    /// Whether this outcome was served from cache.
    pub cache_hit: bool,
    /// The fallback level that produced it, if any.
    pub fallback: Option<super::fallback::FallbackLevel>,
    /// Wall-clock time spent.
    pub duration: Duration,
    /// Events the task asked to publish.
    pub events: Vec<GameEvent>,
}

/// A completion backend.
///
/// One provider per model name; the engine routes each template to
/// its preferred model, falling back to the default provider.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// The model this provider serves.
    fn model(&self) -> &str;

    /// Runs one completion.
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, InferenceError>;
}

/// Template registry plus provider routing and parsing.
pub struct InferenceEngine {
    templates: HashMap<TaskId, TaskTemplate>,
    providers: HashMap<String, Arc<dyn CompletionProvider>>,
    default_provider: Option<Arc<dyn CompletionProvider>>,
}

impl InferenceEngine {
    /// Creates an engine with no templates or providers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            providers: HashMap::new(),
            default_provider: None,
        }
    }

    /// Registers a template after validating it.
    pub fn register_template(&mut self, template: TaskTemplate) -> Result<(), InferenceError> {
        template.validate()?;
        if self.templates.contains_key(&template.id) {
            return Err(InferenceError::DuplicateTask {
                task: template.id.to_string(),
            });
        }
        debug!(task = %template.id, category = %template.category, "template registered");
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Registers a provider under its model name.
    pub fn register_provider(&mut self, provider: Arc<dyn CompletionProvider>) {
        self.providers.insert(provider.model().to_string(), provider);
    }

    /// Sets the provider used when a template's preferred model has
    /// no registered provider.
    pub fn set_default_provider(&mut self, provider: Arc<dyn CompletionProvider>) {
        self.default_provider = Some(provider);
    }

    /// Looks up a registered template.
    #[must_use]
    pub fn template(&self, task: &TaskId) -> Option<&TaskTemplate> {
        self.templates.get(task)
    }

    fn provider_for(&self, template: &TaskTemplate) -> Result<Arc<dyn CompletionProvider>, InferenceError> {
        if let Some(model) = &template.preferred_model {
            if let Some(provider) = self.providers.get(model) {
                return Ok(Arc::clone(provider));
            }
            if let Some(default) = &self.default_provider {
                warn!(task = %template.id, model = %model, "preferred model unavailable, using default provider");
                return Ok(Arc::clone(default));
            }
            return Err(InferenceError::ProviderUnavailable {
                model: model.clone(),
            });
        }
        self.default_provider
            .clone()
            .ok_or_else(|| InferenceError::ProviderUnavailable {
                model: "default".into(),
            })
    }

    /// Degraded re-run: the bound prompt is shortened and the
    /// completion goes to `model` when a provider for it is
    /// registered, otherwise through the normal routing, at a
    /// reduced temperature.
    pub async fn run_simplified(
        &self,
        request: &TaskRequest,
        model: Option<&str>,
    ) -> Result<TaskOutcome, InferenceError> {
        let template = self
            .templates
            .get(&request.task)
            .ok_or_else(|| InferenceError::UnknownTask {
                task: request.task.to_string(),
            })?;
        let prompt = shorten_prompt(&template.bind(&request.variables)?);
        let provider = match model.and_then(|m| self.providers.get(m)) {
            Some(provider) => Arc::clone(provider),
            None => self.provider_for(template)?,
        };
        let temperature = template.temperature.min(0.3);

        let started = Instant::now();
        let raw = provider.complete(&prompt, temperature).await?;
        let duration = started.elapsed();

        let parsed = parse_response(&raw, template.format);
        let (quality, confidence) = score(&parsed);

        Ok(TaskOutcome {
            task: template.id.clone(),
            success: parsed.status() == ParseStatus::Parsed,
            raw,
            parsed,
            quality,
            confidence,
            cache_hit: false,
            fallback: None,
            duration,
            events: Vec::new(),
        })
    }

    /// Runs one request end to end: bind, complete, parse, score.
    pub async fn run(&self, request: &TaskRequest) -> Result<TaskOutcome, InferenceError> {
        let template = self
            .templates
            .get(&request.task)
            .ok_or_else(|| InferenceError::UnknownTask {
                task: request.task.to_string(),
            })?;
        let prompt = template.bind(&request.variables)?;
        let provider = self.provider_for(template)?;

        let started = Instant::now();
        let raw = provider.complete(&prompt, template.temperature).await?;
        let duration = started.elapsed();

        let parsed = parse_response(&raw, template.format);
        let (quality, confidence) = score(&parsed);

        Ok(TaskOutcome {
            task: template.id.clone(),
            success: parsed.status() == ParseStatus::Parsed,
            raw,
            parsed,
            quality,
            confidence,
            cache_hit: false,
            fallback: None,
            duration,
            events: Vec::new(),
        })
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Cuts a prompt down to its leading sentences and appends a
/// brevity instruction. The cut lands on a sentence or line break
/// when one exists inside the window.
fn shorten_prompt(prompt: &str) -> String {
    const WINDOW: usize = 240;
    let head = match prompt.char_indices().nth(WINDOW) {
        Some((byte, _)) => {
            let window = &prompt[..byte];
            let cut = window.rfind(['.', '\n']).map_or(byte, |p| p + 1);
            &prompt[..cut]
        }
        None => prompt,
    };
    format!("{}\nAnswer briefly in the requested format.", head.trim_end())
}

/// Best-effort parse per the expected format. Never errors: failure
/// is an explicit [`ParsedOutput::Failed`] marker.
#[must_use]
pub fn parse_response(raw: &str, format: OutputFormat) -> ParsedOutput {
    match format {
        OutputFormat::Structured => parse_structured(raw),
        OutputFormat::Sectioned => parse_sectioned(raw),
        OutputFormat::Narrative => {
            let text = raw.trim();
            if text.is_empty() {
                ParsedOutput::Failed { raw: raw.into() }
            } else {
                ParsedOutput::Narrative(text.to_string())
            }
        }
    }
}

/// Extracts the first JSON object, tolerating code fences and prose
/// around it.
fn parse_structured(raw: &str) -> ParsedOutput {
    let candidate = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => return ParsedOutput::Failed { raw: raw.into() },
    };
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => ParsedOutput::Structured(value),
        _ => ParsedOutput::Failed { raw: raw.into() },
    }
}

/// Splits markdown into `#`-headed sections.
fn parse_sectioned(raw: &str) -> ParsedOutput {
    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if let Some(heading) = trimmed.strip_prefix('#') {
            if let Some((name, body)) = current.take() {
                sections.insert(name, body.join("\n").trim().to_string());
            }
            current = Some((heading.trim_start_matches('#').trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = &mut current {
            body.push(line);
        }
    }
    if let Some((name, body)) = current.take() {
        sections.insert(name, body.join("\n").trim().to_string());
    }

    if sections.is_empty() {
        ParsedOutput::Failed { raw: raw.into() }
    } else {
        ParsedOutput::Sectioned(sections)
    }
}

/// Quality and confidence from parse success and structural
/// completeness.
fn score(parsed: &ParsedOutput) -> (f64, f64) {
    match parsed {
        ParsedOutput::Structured(Value::Object(map)) => {
            let completeness = (map.len() as f64 / 4.0).min(1.0);
            (0.7 + 0.2 * completeness, 0.9)
        }
        ParsedOutput::Structured(_) => (0.7, 0.9),
        ParsedOutput::Sectioned(sections) => {
            let completeness = (sections.len() as f64 / 3.0).min(1.0);
            (0.6 + 0.2 * completeness, 0.8)
        }
        ParsedOutput::Narrative(text) => {
            let completeness = (text.len() as f64 / 400.0).min(1.0);
            (0.5 + 0.3 * completeness, 0.7)
        }
        ParsedOutput::Failed { .. } => (0.2, 0.1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Scripted provider returning a fixed response.
    pub(crate) struct StubProvider {
        model: String,
        response: String,
    }

    impl StubProvider {
        pub(crate) fn new(model: &str, response: &str) -> Arc<Self> {
            Arc::new(Self {
                model: model.into(),
                response: response.into(),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        fn model(&self) -> &str {
            &self.model
        }

        async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String, InferenceError> {
            Ok(self.response.clone())
        }
    }

    fn engine_with(template: TaskTemplate, provider: Arc<dyn CompletionProvider>) -> InferenceEngine {
        let mut engine = InferenceEngine::new();
        engine.register_template(template).unwrap();
        engine.set_default_provider(provider);
        engine
    }

    fn request(task: &str) -> TaskRequest {
        TaskRequest::new(
            TaskId::named(task),
            TaskVariables::new(),
            SystemId::named("economy"),
            TickId(1),
        )
    }

    #[tokio::test]
    async fn structured_run_parses_json() {
        let template = TaskTemplate::new("forecast", "analysis", "Forecast the economy")
            .with_format(OutputFormat::Structured);
        let provider = StubProvider::new("stub", r#"Sure: {"growth": 0.02, "risk": "low"}"#);
        let engine = engine_with(template, provider);

        let outcome = engine.run(&request("forecast")).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.parsed.status(), ParseStatus::Parsed);
        match &outcome.parsed {
            ParsedOutput::Structured(v) => assert_eq!(v["risk"], json!("low")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(outcome.quality > 0.7);
    }

    #[tokio::test]
    async fn unparseable_structured_response_is_marked_failed() {
        let template = TaskTemplate::new("forecast", "analysis", "Forecast")
            .with_format(OutputFormat::Structured);
        let provider = StubProvider::new("stub", "I cannot answer that.");
        let engine = engine_with(template, provider);

        let outcome = engine.run(&request("forecast")).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.parsed.status(), ParseStatus::Failed);
        assert!(outcome.quality < 0.5);
        assert_eq!(outcome.raw, "I cannot answer that.");
    }

    #[tokio::test]
    async fn unknown_task_errors() {
        let engine = InferenceEngine::new();
        let err = engine.run(&request("missing")).await.unwrap_err();
        assert!(matches!(err, InferenceError::UnknownTask { .. }));
    }

    #[tokio::test]
    async fn preferred_model_routes_to_its_provider() {
        let template = TaskTemplate::new("story", "narrative", "Tell a story").with_model("fast");
        let mut engine = InferenceEngine::new();
        engine.register_template(template).unwrap();
        engine.register_provider(StubProvider::new("fast", "a short tale"));
        engine.set_default_provider(StubProvider::new("default", "the default tale"));

        let outcome = engine.run(&request("story")).await.unwrap();
        assert_eq!(outcome.raw, "a short tale");
    }

    #[tokio::test]
    async fn missing_preferred_model_falls_back_to_default() {
        let template = TaskTemplate::new("story", "narrative", "Tell a story").with_model("gone");
        let mut engine = InferenceEngine::new();
        engine.register_template(template).unwrap();
        engine.set_default_provider(StubProvider::new("default", "the default tale"));

        let outcome = engine.run(&request("story")).await.unwrap();
        assert_eq!(outcome.raw, "the default tale");
    }

    #[tokio::test]
    async fn no_provider_at_all_errors() {
        let template = TaskTemplate::new("story", "narrative", "Tell a story").with_model("gone");
        let mut engine = InferenceEngine::new();
        engine.register_template(template).unwrap();
        let err = engine.run(&request("story")).await.unwrap_err();
        assert!(matches!(err, InferenceError::ProviderUnavailable { .. }));
    }

    #[test]
    fn duplicate_template_rejected() {
        let mut engine = InferenceEngine::new();
        engine
            .register_template(TaskTemplate::new("story", "narrative", "x"))
            .unwrap();
        let err = engine
            .register_template(TaskTemplate::new("story", "narrative", "y"))
            .unwrap_err();
        assert!(matches!(err, InferenceError::DuplicateTask { .. }));
    }

    struct RecordingProvider {
        model: String,
        response: String,
        prompts: parking_lot::Mutex<Vec<(String, f32)>>,
    }

    impl RecordingProvider {
        fn new(model: &str, response: &str) -> Arc<Self> {
            Arc::new(Self {
                model: model.into(),
                response: response.into(),
                prompts: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for RecordingProvider {
        fn model(&self) -> &str {
            &self.model
        }

        async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, InferenceError> {
            self.prompts.lock().push((prompt.into(), temperature));
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn simplified_run_uses_cheap_model_and_short_prompt() {
        let long_prompt = "Forecast the economy in great detail. ".repeat(20);
        let template = TaskTemplate::new("forecast", "analysis", long_prompt.as_str())
            .with_format(OutputFormat::Structured);
        let mut engine = InferenceEngine::new();
        engine.register_template(template).unwrap();
        let cheap = RecordingProvider::new("cheap", r#"{"growth": 0.01}"#);
        engine.register_provider(Arc::clone(&cheap) as Arc<dyn CompletionProvider>);
        engine.set_default_provider(StubProvider::new("default", "unused"));

        let outcome = engine
            .run_simplified(&request("forecast"), Some("cheap"))
            .await
            .unwrap();
        assert!(outcome.success);

        let calls = cheap.prompts.lock().clone();
        assert_eq!(calls.len(), 1, "the cheap provider served the re-run");
        let (prompt, temperature) = &calls[0];
        assert!(prompt.len() < long_prompt.len());
        assert!(prompt.contains("Answer briefly"));
        assert!(*temperature <= 0.3);
    }

    #[tokio::test]
    async fn simplified_run_without_named_model_uses_default_routing() {
        let template = TaskTemplate::new("forecast", "analysis", "Forecast")
            .with_format(OutputFormat::Structured);
        let mut engine = InferenceEngine::new();
        engine.register_template(template).unwrap();
        engine.set_default_provider(StubProvider::new("default", r#"{"growth": 0.0}"#));

        let outcome = engine.run_simplified(&request("forecast"), None).await.unwrap();
        assert!(outcome.success);
    }

    #[test]
    fn shorten_prompt_cuts_on_sentence_boundary() {
        let long = "First sentence here. Second sentence here. ".repeat(20);
        let short = shorten_prompt(&long);
        assert!(short.chars().count() < long.chars().count());
        assert!(short.contains("Answer briefly"));
        // the cut never splits a multi-byte character
        let accented = "é".repeat(500);
        let _ = shorten_prompt(&accented);
    }

    #[test]
    fn shorten_prompt_keeps_short_prompts_whole() {
        let short = shorten_prompt("Forecast the economy.");
        assert!(short.starts_with("Forecast the economy."));
    }

    #[test]
    fn sectioned_parsing() {
        let raw = "# Summary\nAll is well.\n\n## Risks\nNone found.";
        match parse_response(raw, OutputFormat::Sectioned) {
            ParsedOutput::Sectioned(sections) => {
                assert_eq!(sections["Summary"], "All is well.");
                assert_eq!(sections["Risks"], "None found.");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sectioned_without_headings_fails() {
        let parsed = parse_response("just prose", OutputFormat::Sectioned);
        assert_eq!(parsed.status(), ParseStatus::Failed);
    }

    #[test]
    fn empty_narrative_fails() {
        let parsed = parse_response("   \n ", OutputFormat::Narrative);
        assert_eq!(parsed.status(), ParseStatus::Failed);
    }
}
