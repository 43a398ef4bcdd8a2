//! Declarative scenario format.
//!
//! A suite file declares shared variables, reusable step fragments and the
//! scenarios themselves. Fragments are expanded when the file is loaded;
//! `${NAME}` references are resolved when a step runs.
//!
//! ```yaml
//! name: garagem40
//! base_url: http://127.0.0.1:3000
//! variables:
//!   PASSWORD: ${TEST_USER_PASSWORD:-Test@12345}
//! fragments:
//!   login:
//!     - navigate: /login
//!     - fill: { target: [testid=login-email, '//input[@type="email"]'], text: "${EMAIL}" }
//! scenarios:
//!   - name: login
//!     steps:
//!       - use: login
//!         with: { EMAIL: admin@garagem40.test }
//!       - assert_visible: text=Dashboard
//! ```

use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::driver::LoadState;
use crate::result::{HarnessError, HarnessResult};
use crate::retry::RetryPolicy;
use crate::selector::{Selector, SelectorCandidate};

// ============================================================================
// Steps
// ============================================================================

/// Navigation target, written as a bare URL or `{ url, wait_until }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigateStep {
    /// Absolute URL or path relative to the base URL
    pub url: String,
    /// Load state to wait for
    pub wait_until: LoadState,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NavigateRepr {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        wait_until: LoadState,
    },
}

impl<'de> Deserialize<'de> for NavigateStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match NavigateRepr::deserialize(deserializer)? {
            NavigateRepr::Url(url) => Self {
                url,
                wait_until: LoadState::default(),
            },
            NavigateRepr::Detailed { url, wait_until } => Self { url, wait_until },
        })
    }
}

/// `fill` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillStep {
    /// Input to fill
    pub target: SelectorCandidate,
    /// Text to type
    pub text: String,
}

/// `upload` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStep {
    /// Control whose click opens the file chooser
    pub target: SelectorCandidate,
    /// File to supply, relative to the suite file
    pub file: PathBuf,
}

fn page_body() -> SelectorCandidate {
    SelectorCandidate::single(Selector::css("body"))
}

/// `wait_for_text` / `assert_text` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStep {
    /// Element whose text is checked (the page body when omitted)
    #[serde(default = "page_body")]
    pub target: SelectorCandidate,
    /// Expected substring
    pub text: String,
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Navigate to a URL
    Navigate(NavigateStep),
    /// Fill an input
    Fill(FillStep),
    /// Click an element
    Click(SelectorCandidate),
    /// Upload a file through the chooser opened by clicking the target
    Upload(UploadStep),
    /// Wait for an element to become visible; failure is a timeout
    WaitForVisible(SelectorCandidate),
    /// Wait for text inside an element; failure is a timeout
    WaitForText(TextStep),
    /// Wait for a page load state
    WaitForLoad(LoadState),
    /// The element must become visible
    AssertVisible(SelectorCandidate),
    /// The element must not be visible (negative assertion)
    AssertHidden(SelectorCandidate),
    /// The element's text must contain a substring
    AssertText(TextStep),
}

/// Step family, deciding retry and failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Page navigation
    Navigation,
    /// fill / click / upload
    Interaction,
    /// Explicit wait; failure reports Timeout
    Wait,
    /// Assertion; failure reports `AssertionFailed`
    Assertion,
}

impl StepKind {
    /// Waits and assertions observe the end state of a scenario
    #[must_use]
    pub const fn is_check(self) -> bool {
        matches!(self, Self::Wait | Self::Assertion)
    }
}

impl StepAction {
    /// Step family
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Navigate(_) => StepKind::Navigation,
            Self::Fill(_) | Self::Click(_) | Self::Upload(_) => StepKind::Interaction,
            Self::WaitForVisible(_) | Self::WaitForText(_) | Self::WaitForLoad(_) => StepKind::Wait,
            Self::AssertVisible(_) | Self::AssertHidden(_) | Self::AssertText(_) => {
                StepKind::Assertion
            }
        }
    }

    /// YAML key of this action
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Navigate(_) => "navigate",
            Self::Fill(_) => "fill",
            Self::Click(_) => "click",
            Self::Upload(_) => "upload",
            Self::WaitForVisible(_) => "wait_for_visible",
            Self::WaitForText(_) => "wait_for_text",
            Self::WaitForLoad(_) => "wait_for_load",
            Self::AssertVisible(_) => "assert_visible",
            Self::AssertHidden(_) => "assert_hidden",
            Self::AssertText(_) => "assert_text",
        }
    }

    /// Element selector, if the action has one
    #[must_use]
    pub const fn target(&self) -> Option<&SelectorCandidate> {
        match self {
            Self::Fill(FillStep { target, .. })
            | Self::Upload(UploadStep { target, .. })
            | Self::WaitForText(TextStep { target, .. })
            | Self::AssertText(TextStep { target, .. })
            | Self::Click(target)
            | Self::WaitForVisible(target)
            | Self::AssertVisible(target)
            | Self::AssertHidden(target) => Some(target),
            Self::Navigate(_) | Self::WaitForLoad(_) => None,
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigate(nav) => write!(f, "navigate {}", nav.url),
            Self::WaitForLoad(state) => write!(f, "wait_for_load {state}"),
            Self::Upload(up) => write!(f, "upload {} via {}", up.file.display(), up.target),
            Self::WaitForText(t) | Self::AssertText(t) => {
                write!(f, "{} {:?} in {}", self.name(), t.text, t.target)
            }
            other => match other.target() {
                Some(target) => write!(f, "{} {target}", other.name()),
                None => f.write_str(other.name()),
            },
        }
    }
}

/// One scenario step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// What to do
    #[serde(flatten)]
    pub action: StepAction,
    /// Per-step timeout; the configured default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Failure is logged and skipped instead of failing the scenario
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    /// Label shown in reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Step {
    /// Create a step
    #[must_use]
    pub const fn new(action: StepAction) -> Self {
        Self {
            action,
            timeout_ms: None,
            optional: false,
            label: None,
        }
    }

    /// Set the timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Mark as optional
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Step family
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        self.action.kind()
    }

    /// Explicit timeout, if set
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Rewrite every free-text payload (URLs, fill text, file paths,
    /// expected text). Selectors are left untouched.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `f`
    pub fn try_map_text<E, F>(&self, mut f: F) -> Result<Self, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        let mut step = self.clone();
        match &mut step.action {
            StepAction::Navigate(nav) => nav.url = f(&nav.url)?,
            StepAction::Fill(fill) => fill.text = f(&fill.text)?,
            StepAction::Upload(up) => up.file = PathBuf::from(f(&up.file.to_string_lossy())?),
            StepAction::WaitForText(t) | StepAction::AssertText(t) => t.text = f(&t.text)?,
            StepAction::Click(_)
            | StepAction::WaitForVisible(_)
            | StepAction::WaitForLoad(_)
            | StepAction::AssertVisible(_)
            | StepAction::AssertHidden(_) => {}
        }
        Ok(step)
    }

    fn payloads(&self) -> Vec<String> {
        match &self.action {
            StepAction::Navigate(nav) => vec![nav.url.clone()],
            StepAction::Fill(fill) => vec![fill.text.clone()],
            StepAction::Upload(up) => vec![up.file.to_string_lossy().into_owned()],
            StepAction::WaitForText(t) | StepAction::AssertText(t) => vec![t.text.clone()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "[{label}] {}", self.action),
            None => write!(f, "{}", self.action),
        }
    }
}

// ============================================================================
// Preconditions and variables
// ============================================================================

/// External state a scenario needs before any step runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// Environment flag that must be set and non-empty (e.g. seed marker)
    Env(String),
    /// File that must exist, relative to the suite file
    File(PathBuf),
}

impl Precondition {
    /// Check the precondition; `Err` carries the diagnostic
    ///
    /// # Errors
    ///
    /// Returns a description of what is missing
    pub fn check(&self, base_dir: &Path, vars: &Variables) -> Result<(), String> {
        match self {
            Self::Env(name) => match vars.env(name) {
                Some(value) if !value.trim().is_empty() => Ok(()),
                _ => Err(format!("environment flag {name} is not set")),
            },
            Self::File(path) => {
                let full = base_dir.join(path);
                if full.is_file() {
                    Ok(())
                } else {
                    Err(format!("required file {} does not exist", full.display()))
                }
            }
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env(name) => write!(f, "env {name}"),
            Self::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .unwrap_or_else(|e| unreachable!("static variable pattern is valid: {e}"))
    })
}

/// Names referenced by `${NAME}` / `${NAME:-default}` in `input`, with
/// whether a default is present
fn references(input: &str) -> impl Iterator<Item = (&str, bool)> {
    variable_pattern().captures_iter(input).filter_map(|caps| {
        caps.get(1)
            .map(|name| (name.as_str(), caps.get(2).is_some()))
    })
}

/// Replace only references `lookup` knows; leave the rest for run time
fn substitute_known(input: &str, lookup: &BTreeMap<String, String>) -> String {
    variable_pattern()
        .replace_all(input, |caps: &Captures<'_>| {
            lookup
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

const MAX_INTERPOLATION_DEPTH: usize = 8;

/// Variable scope for one scenario run: scenario variables, then suite
/// variables, then the environment
#[derive(Clone)]
pub struct Variables {
    layers: Vec<BTreeMap<String, String>>,
    env: Arc<EnvLookup>,
}

impl fmt::Debug for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variables")
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl Default for Variables {
    fn default() -> Self {
        Self::new()
    }
}

impl Variables {
    /// Scope backed by the process environment
    #[must_use]
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Add a layer with lower precedence than the existing ones
    #[must_use]
    pub fn with_layer(mut self, layer: BTreeMap<String, String>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Environment value
    #[must_use]
    pub fn env(&self, name: &str) -> Option<String> {
        (self.env)(name)
    }

    /// Raw value of a variable
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.get(name).cloned())
            .or_else(|| self.env(name))
    }

    /// Resolve every reference in `input`.
    ///
    /// # Errors
    ///
    /// Returns the name of the first reference with no value and no default
    pub fn interpolate(&self, input: &str) -> Result<String, String> {
        self.interpolate_at(input, 0)
    }

    fn interpolate_at(&self, input: &str, depth: usize) -> Result<String, String> {
        let mut missing = None;
        let output = variable_pattern().replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[1];
            let value = self
                .get(name)
                .or_else(|| caps.get(2).map(|d| d.as_str().to_string()));
            match value {
                Some(v) if depth < MAX_INTERPOLATION_DEPTH && v.contains("${") => {
                    self.interpolate_at(&v, depth + 1).unwrap_or_else(|name| {
                        missing.get_or_insert(name);
                        String::new()
                    })
                }
                Some(v) => v,
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(name),
            None => Ok(output.into_owned()),
        }
    }
}

// ============================================================================
// Scenarios and suites
// ============================================================================

/// `use: <fragment>` entry with optional `with:` bindings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FragmentUse {
    #[serde(rename = "use")]
    fragment: String,
    #[serde(default)]
    with: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StepEntry {
    Use(FragmentUse),
    Step(Step),
}

/// One end-to-end user flow
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Scenario {
    /// Unique name within the suite
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Checked before a session is acquired
    #[serde(with = "serde_yaml_ng::with::singleton_map_recursive")]
    pub requires: Vec<Precondition>,
    /// Scenario-level variables
    pub variables: BTreeMap<String, String>,
    /// Steps, fragments already expanded
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Create an empty scenario
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append a step
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a precondition
    #[must_use]
    pub fn with_requirement(mut self, precondition: Precondition) -> Self {
        self.requires.push(precondition);
        self
    }

    /// Set a scenario variable
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    fn check_structure(&self) -> HarnessResult<()> {
        let invalid = |message: &str| HarnessError::invalid_scenario(&self.name, message);
        if self.name.trim().is_empty() {
            return Err(HarnessError::invalid_scenario("<unnamed>", "scenario name is empty"));
        }
        let Some(last) = self.steps.last() else {
            return Err(invalid("scenario has no steps"));
        };
        if !self.steps.iter().any(|s| s.kind().is_check()) {
            return Err(invalid("scenario has no assertion or wait step"));
        }
        if !last.kind().is_check() {
            return Err(invalid(&format!(
                "final step must be an assertion or wait, found '{}'",
                last.action.name()
            )));
        }
        if last.optional {
            return Err(invalid("final step cannot be optional"));
        }
        if self.steps.iter().any(|s| s.timeout_ms == Some(0)) {
            return Err(invalid("timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawScenario {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, with = "serde_yaml_ng::with::singleton_map_recursive")]
    requires: Vec<Precondition>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
    steps: Vec<StepEntry>,
}

/// Suite-wide overrides of the harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SuiteDefaults {
    /// Default per-step timeout
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,
    /// Navigation timeout
    #[serde(default)]
    pub navigation_timeout_ms: Option<u64>,
    /// Retry policy for interaction steps
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Deserialize)]
struct RawSuite {
    name: String,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    defaults: SuiteDefaults,
    #[serde(default)]
    variables: BTreeMap<String, String>,
    #[serde(default)]
    fragments: BTreeMap<String, Vec<StepEntry>>,
    scenarios: Vec<RawScenario>,
}

/// Non-fatal finding from [`Suite::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// Scenario the warning is about
    pub scenario: String,
    /// Step index (0-based), when step-specific
    pub step: Option<usize>,
    /// What is wrong
    pub message: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "{} step {}: {}", self.scenario, step + 1, self.message),
            None => write!(f, "{}: {}", self.scenario, self.message),
        }
    }
}

/// A loaded suite file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suite {
    /// Suite name
    pub name: String,
    /// Base URL declared by the suite
    pub base_url: Option<String>,
    /// Timeout and retry overrides
    pub defaults: SuiteDefaults,
    /// Suite-level variables
    pub variables: BTreeMap<String, String>,
    /// Scenarios in file order
    pub scenarios: Vec<Scenario>,
    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Suite {
    /// Build a suite in code
    #[must_use]
    pub fn new(name: impl Into<String>, scenarios: Vec<Scenario>) -> Self {
        Self {
            name: name.into(),
            base_url: None,
            defaults: SuiteDefaults::default(),
            variables: BTreeMap::new(),
            scenarios,
            base_dir: PathBuf::from("."),
        }
    }

    /// Parse, expand fragments and validate a suite from YAML.
    ///
    /// # Errors
    ///
    /// Returns error if the YAML is malformed or validation fails
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let raw: RawSuite = serde_yaml_ng::from_str(yaml).map_err(|e| HarnessError::ScenarioParse {
            message: e.to_string(),
        })?;

        let mut scenarios = Vec::with_capacity(raw.scenarios.len());
        for scenario in raw.scenarios {
            let steps = expand(&scenario.name, scenario.steps, &raw.fragments, &mut Vec::new())?;
            scenarios.push(Scenario {
                name: scenario.name,
                description: scenario.description,
                requires: scenario.requires,
                variables: scenario.variables,
                steps,
            });
        }

        let suite = Self {
            name: raw.name,
            base_url: raw.base_url,
            defaults: raw.defaults,
            variables: raw.variables,
            scenarios,
            base_dir: PathBuf::from("."),
        };
        for warning in suite.validate()? {
            debug!(suite = %suite.name, %warning, "validation warning");
        }
        Ok(suite)
    }

    /// Load a suite file; relative paths in it resolve against its directory
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut suite = Self::from_yaml(&content)?;
        suite.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(suite)
    }

    /// Reject unrunnable suites; return non-fatal warnings
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found
    pub fn validate(&self) -> HarnessResult<Vec<ValidationWarning>> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::invalid_scenario("<suite>", "suite name is empty"));
        }
        if self.scenarios.is_empty() {
            return Err(HarnessError::invalid_scenario(&self.name, "suite has no scenarios"));
        }

        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            scenario.check_structure()?;
            if !seen.insert(scenario.name.as_str()) {
                return Err(HarnessError::invalid_scenario(
                    &scenario.name,
                    "duplicate scenario name",
                ));
            }
        }

        let mut warnings = Vec::new();
        for scenario in &self.scenarios {
            for (index, step) in scenario.steps.iter().enumerate() {
                if let Some(target) = step.action.target() {
                    for selector in target.positional() {
                        warnings.push(ValidationWarning {
                            scenario: scenario.name.clone(),
                            step: Some(index),
                            message: format!(
                                "positional selector {selector} breaks on layout changes; prefer a test id"
                            ),
                        });
                    }
                }
                for payload in step.payloads() {
                    for (name, has_default) in references(&payload) {
                        let declared = scenario.variables.contains_key(name)
                            || self.variables.contains_key(name);
                        if !declared && !has_default {
                            warnings.push(ValidationWarning {
                                scenario: scenario.name.clone(),
                                step: Some(index),
                                message: format!(
                                    "${{{name}}} is not declared; it must come from the environment"
                                ),
                            });
                        }
                    }
                }
            }
        }
        Ok(warnings)
    }

    /// Fold the suite's base URL and defaults into a configuration
    #[must_use]
    pub fn configure(&self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(url) = &self.base_url {
            config.base_url.clone_from(url);
        }
        if let Some(ms) = self.defaults.step_timeout_ms {
            config.step_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.defaults.navigation_timeout_ms {
            config.navigation_timeout = Duration::from_millis(ms);
        }
        if let Some(retry) = self.defaults.retry {
            config.retry = retry;
        }
        config
    }

    /// Find a scenario by name
    #[must_use]
    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Keep only the named scenarios (all of them when `names` is empty)
    ///
    /// # Errors
    ///
    /// Returns error if a name does not exist in the suite
    pub fn select(&self, names: &[String]) -> HarnessResult<Self> {
        if names.is_empty() {
            return Ok(self.clone());
        }
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let scenario = self.scenario(name).ok_or_else(|| {
                HarnessError::invalid_scenario(name, format!("not found in suite '{}'", self.name))
            })?;
            selected.push(scenario.clone());
        }
        Ok(Self {
            scenarios: selected,
            ..self.clone()
        })
    }

    /// Variable scope for one scenario of this suite
    #[must_use]
    pub fn variables_for(&self, scenario: &Scenario) -> Variables {
        Variables::new()
            .with_layer(scenario.variables.clone())
            .with_layer(self.variables.clone())
    }
}

fn expand(
    scenario: &str,
    entries: Vec<StepEntry>,
    fragments: &BTreeMap<String, Vec<StepEntry>>,
    stack: &mut Vec<String>,
) -> HarnessResult<Vec<Step>> {
    let mut steps = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            StepEntry::Step(step) => steps.push(step),
            StepEntry::Use(FragmentUse { fragment, with }) => {
                if stack.contains(&fragment) {
                    return Err(HarnessError::invalid_scenario(
                        scenario,
                        format!("fragment '{fragment}' uses itself ({} -> {fragment})", stack.join(" -> ")),
                    ));
                }
                let body = fragments.get(&fragment).ok_or_else(|| {
                    HarnessError::invalid_scenario(scenario, format!("unknown fragment '{fragment}'"))
                })?;
                let body = body.clone();
                stack.push(fragment.clone());
                let expanded = expand(scenario, body, fragments, stack)?;
                stack.pop();

                for step in expanded {
                    let mut step = step
                        .try_map_text(|text| Ok::<_, Infallible>(substitute_known(text, &with)))
                        .unwrap_or_else(|never| match never {});
                    if step.label.is_none() {
                        step.label = Some(fragment.clone());
                    }
                    steps.push(step);
                }
            }
        }
    }
    Ok(steps)
}
