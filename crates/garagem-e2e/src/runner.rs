//! Scenario Runner
//!
//! ```text
//! Initializing ──► preconditions ──► acquire session ──► Executing
//!      │ missing                         │ error             │
//!      ▼                                 ▼                   ▼
//!   Failed (PreconditionMissing)    Failed (harness)   step 1..n, each through
//!                                                      the retry controller
//!                                                           │
//!                                       first fatal step ◄──┴──► all done
//!                                              │                    │
//!                                   release ◄──┘                    └──► release
//!                                              ▼                               ▼
//!                                            Failed                         Passed
//! ```
//!
//! Steps run strictly in order within a scenario. Scenarios of a suite may
//! run concurrently, each in its own session.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionExecutor};
use crate::config::HarnessConfig;
use crate::driver::BrowserDriver;
use crate::outcome::{AttemptFailure, AttemptOutcome, FailureKind};
use crate::report::{ScenarioFailure, ScenarioResult, StepRecord, SuiteReport};
use crate::resolver::LocatorResolver;
use crate::retry::{RetryController, RetryPolicy};
use crate::scenario::{Scenario, Step, StepAction, StepKind, Suite, Variables};
use crate::selector::SelectorCandidate;
use crate::session::SessionFactory;

/// Lifecycle of one scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Checking preconditions and acquiring the session
    Initializing,
    /// Running steps
    Executing,
    /// All steps completed
    Passed,
    /// Stopped on a fatal failure
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Executing => "executing",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(scenario: &str, state: &mut RunState, next: RunState) {
    debug!(scenario, from = %state, to = %next, "run state");
    *state = next;
}

/// Runs scenarios against sessions from a factory
#[derive(Clone)]
pub struct ScenarioRunner {
    factory: Arc<dyn SessionFactory>,
    config: HarnessConfig,
    resolver: LocatorResolver,
    executor: ActionExecutor,
    base_dir: PathBuf,
}

impl fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("config", &self.config)
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl ScenarioRunner {
    /// Create a runner
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>, config: HarnessConfig) -> Self {
        let resolver = LocatorResolver::new().with_poll_interval(config.poll_interval);
        let executor = ActionExecutor::new().with_poll_interval(config.poll_interval);
        Self {
            factory,
            config,
            resolver,
            executor,
            base_dir: PathBuf::from("."),
        }
    }

    /// Directory that relative file paths resolve against
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one scenario with its own variables and the process environment
    pub async fn run(&self, scenario: &Scenario) -> ScenarioResult {
        let vars = Variables::new().with_layer(scenario.variables.clone());
        self.run_in(scenario, &vars, &self.base_dir).await
    }

    /// Run one scenario with an explicit variable scope
    pub async fn run_with(&self, scenario: &Scenario, vars: &Variables) -> ScenarioResult {
        self.run_in(scenario, vars, &self.base_dir).await
    }

    /// Run every scenario of a suite, up to `concurrency` at once, each in
    /// its own session. Results keep suite order.
    pub async fn run_suite(&self, suite: &Suite) -> SuiteReport {
        let started = Instant::now();
        let concurrency = self.config.concurrency.max(1);
        info!(
            suite = %suite.name,
            scenarios = suite.scenarios.len(),
            concurrency,
            "running suite"
        );

        let results: Vec<ScenarioResult> = stream::iter(suite.scenarios.iter().map(|scenario| {
            let vars = suite.variables_for(scenario);
            async move { self.run_in(scenario, &vars, &suite.base_dir).await }
        }))
        .buffered(concurrency)
        .collect()
        .await;

        let report = SuiteReport::new(&suite.name, results, started.elapsed());
        info!(suite = %suite.name, summary = %report.summary(), "suite finished");
        report
    }

    async fn run_in(&self, scenario: &Scenario, vars: &Variables, base_dir: &Path) -> ScenarioResult {
        let started = Instant::now();
        let name = scenario.name.as_str();
        let mut state = RunState::Initializing;
        info!(scenario = name, "scenario started");

        // Preconditions and variables are checked before any session exists.
        let steps = match Self::prepare(scenario, vars, base_dir) {
            Ok(steps) => steps,
            Err(failure) => {
                transition(name, &mut state, RunState::Failed);
                warn!(scenario = name, %failure, "precondition missing");
                return ScenarioResult::failed(name, Vec::new(), failure, started.elapsed());
            }
        };

        let session = match self.factory.acquire().await {
            Ok(session) => session,
            Err(error) => {
                transition(name, &mut state, RunState::Failed);
                warn!(scenario = name, %error, "session acquisition failed");
                let failure = ScenarioFailure::harness(None, format!("session acquisition failed: {error}"));
                return ScenarioResult::failed(name, Vec::new(), failure, started.elapsed());
            }
        };
        let session_id = session.id();
        transition(name, &mut state, RunState::Executing);

        let mut records = Vec::with_capacity(steps.len());
        let execution = AssertUnwindSafe(self.execute(session.driver(), name, &steps, base_dir, &mut records))
            .catch_unwind()
            .await;

        if let Err(error) = session.release().await {
            warn!(scenario = name, session = %session_id, %error, "session release failed");
        }

        let failure = match execution {
            Ok(failure) => failure,
            Err(panic) => Some(ScenarioFailure::harness(
                Some(records.len()),
                format!("panic during step execution: {}", panic_message(panic.as_ref())),
            )),
        };

        match failure {
            None => {
                transition(name, &mut state, RunState::Passed);
                let result = ScenarioResult::passed(name, records, started.elapsed());
                info!(scenario = name, retries = result.total_retries(), "scenario passed");
                result
            }
            Some(failure) => {
                transition(name, &mut state, RunState::Failed);
                warn!(scenario = name, %failure, "scenario failed");
                ScenarioResult::failed(name, records, failure, started.elapsed())
            }
        }
    }

    fn prepare(
        scenario: &Scenario,
        vars: &Variables,
        base_dir: &Path,
    ) -> Result<Vec<Step>, ScenarioFailure> {
        for precondition in &scenario.requires {
            precondition
                .check(base_dir, vars)
                .map_err(ScenarioFailure::precondition)?;
        }
        scenario
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                step.try_map_text(|text| vars.interpolate(text)).map_err(|name| {
                    ScenarioFailure::precondition(format!(
                        "step {} ({}) references ${{{name}}}, which has no value and no default",
                        index + 1,
                        step.action.name()
                    ))
                })
            })
            .collect()
    }

    async fn execute(
        &self,
        driver: &dyn BrowserDriver,
        scenario: &str,
        steps: &[Step],
        base_dir: &Path,
        records: &mut Vec<StepRecord>,
    ) -> Option<ScenarioFailure> {
        for (index, step) in steps.iter().enumerate() {
            let started = Instant::now();
            let timeout = self.timeout_for(step);
            let policy = match step.kind() {
                StepKind::Navigation | StepKind::Interaction => self.config.retry,
                StepKind::Wait | StepKind::Assertion => RetryPolicy::once(),
            };
            debug!(scenario, step = index + 1, action = %step, "executing step");

            let report = RetryController::new(policy)
                .run(move |attempt| self.attempt(driver, step, timeout, base_dir, attempt))
                .await;

            records.push(StepRecord {
                index,
                label: step.label.clone(),
                action: step.action.to_string(),
                kind: step.kind(),
                outcome: report.outcome.clone(),
                attempts: report.attempts,
                optional: step.optional,
                duration: started.elapsed(),
            });

            if let AttemptOutcome::Failure(failure) = report.outcome {
                if step.optional {
                    debug!(scenario, step = index + 1, %failure, "optional step failed, continuing");
                    continue;
                }
                return Some(ScenarioFailure::at_step(
                    index,
                    step.action.to_string(),
                    failure.kind,
                    failure.message,
                ));
            }
        }
        None
    }

    fn timeout_for(&self, step: &Step) -> Duration {
        step.timeout().unwrap_or(match step.kind() {
            StepKind::Navigation => self.config.navigation_timeout,
            _ => self.config.step_timeout,
        })
    }

    async fn attempt(
        &self,
        driver: &dyn BrowserDriver,
        step: &Step,
        timeout: Duration,
        base_dir: &Path,
        attempt: u32,
    ) -> AttemptOutcome {
        if attempt > 1 {
            debug!(attempt, action = %step.action, "re-resolving for retry");
        }
        match &step.action {
            StepAction::Navigate(nav) => {
                let url = self.config.resolve_url(&nav.url);
                driver
                    .navigate(&url, nav.wait_until, timeout)
                    .await
                    .map_err(|e| AttemptFailure::from_driver(&e))
                    .into()
            }
            StepAction::WaitForLoad(load_state) => as_wait(
                driver
                    .wait_for_load_state(*load_state, timeout)
                    .await
                    .map_err(|e| AttemptFailure::from_driver(&e))
                    .into(),
            ),
            StepAction::Fill(fill) => {
                self.interact(driver, &fill.target, &Action::Fill(fill.text.clone()), timeout)
                    .await
            }
            StepAction::Click(target) => self.interact(driver, target, &Action::Click, timeout).await,
            StepAction::Upload(upload) => {
                let action = Action::UploadFile(base_dir.join(&upload.file));
                self.interact(driver, &upload.target, &action, timeout).await
            }
            StepAction::WaitForVisible(target) => as_wait(self.visible(driver, target, timeout).await),
            StepAction::WaitForText(text) => as_wait(
                self.interact(driver, &text.target, &Action::WaitForText(text.text.clone()), timeout)
                    .await,
            ),
            StepAction::AssertVisible(target) => {
                as_assertion(self.visible(driver, target, timeout).await)
            }
            StepAction::AssertText(text) => as_assertion(
                self.interact(driver, &text.target, &Action::WaitForText(text.text.clone()), timeout)
                    .await,
            ),
            StepAction::AssertHidden(target) => self.hidden(driver, target, timeout).await,
        }
    }

    /// Resolve fresh, then act. Both phases share one deadline.
    async fn interact(
        &self,
        driver: &dyn BrowserDriver,
        target: &SelectorCandidate,
        action: &Action,
        timeout: Duration,
    ) -> AttemptOutcome {
        let deadline = Instant::now() + timeout;
        match self.resolver.resolve(driver, target, timeout).await {
            Ok(element) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.executor.act(driver, &element.handle, action, remaining).await
            }
            Err(failure) => AttemptOutcome::Failure(failure),
        }
    }

    async fn visible(
        &self,
        driver: &dyn BrowserDriver,
        target: &SelectorCandidate,
        timeout: Duration,
    ) -> AttemptOutcome {
        self.resolver
            .resolve(driver, target, timeout)
            .await
            .map(|_| ())
            .into()
    }

    /// Negative assertion: no strategy may resolve to a visible element
    async fn hidden(
        &self,
        driver: &dyn BrowserDriver,
        target: &SelectorCandidate,
        timeout: Duration,
    ) -> AttemptOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            match self.resolver.locate_once(driver, target).await {
                Ok(None) => return AttemptOutcome::Success,
                Ok(Some(found)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return AttemptOutcome::failure(
                            FailureKind::AssertionFailed,
                            format!(
                                "{} is still visible via {} after {}ms",
                                target,
                                found.selector,
                                timeout.as_millis()
                            ),
                        );
                    }
                    sleep(self.resolver.poll_interval().min(deadline - now)).await;
                }
                Err(failure) => return AttemptOutcome::Failure(failure),
            }
        }
    }
}

/// Failures the application caused become `kind`; harness-side refusals
/// (closed session, missing file) keep their own kind.
fn reclassify_check(outcome: AttemptOutcome, kind: FailureKind) -> AttemptOutcome {
    match outcome {
        AttemptOutcome::Failure(failure)
            if !matches!(
                failure.kind,
                FailureKind::ActionRejected | FailureKind::PreconditionMissing
            ) =>
        {
            AttemptOutcome::Failure(AttemptFailure::new(kind, failure.message))
        }
        other => other,
    }
}

fn as_wait(outcome: AttemptOutcome) -> AttemptOutcome {
    reclassify_check(outcome, FailureKind::Timeout)
}

fn as_assertion(outcome: AttemptOutcome) -> AttemptOutcome {
    reclassify_check(outcome, FailureKind::AssertionFailed)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, ElementHandle};
    use crate::mock::{MockDriver, MockEffect, MockElement, MockOp, MockSessionFactory};
    use crate::outcome::FailureCategory;
    use crate::selector::Selector;
    use std::collections::BTreeMap;

    const SUITE: &str = r#"
name: runner
variables:
  PASSWORD: ${TEST_USER_PASSWORD:-Test@12345}
fragments:
  login:
    - navigate: /login
    - fill:
        target: [testid=login-email, '//input[@type="email"]']
        text: ${EMAIL}
    - fill:
        target: [testid=login-password, 'input[type="password"]']
        text: ${PASSWORD}
    - click: [testid=login-submit, '//button[contains(.,"Entrar")]']
    - wait_for_load: network_idle
scenarios:
  - name: login-admin
    steps:
      - use: login
        with: { EMAIL: admin@garagem40.test }
      - assert_visible: [testid=nav-estoque, text=Estoque]
  - name: rbac-admin
    steps:
      - use: login
        with: { EMAIL: admin@garagem40.test }
      - click: [testid=nav-estoque, text=Estoque]
      - wait_for_load: network_idle
      - assert_visible: [testid=price-display, text=R$]
  - name: rbac-operator
    steps:
      - use: login
        with: { EMAIL: operador@garagem40.test }
      - click: [testid=nav-estoque, text=Estoque]
      - wait_for_load: network_idle
      - assert_hidden: [testid=price-display, text=R$]
  - name: plate-ocr
    requires:
      - file: CNH_fake.jpg
    steps:
      - click: testid=fab-new
      - upload:
          target: testid=btn-plate-scan
          file: CNH_fake.jpg
      - wait_for_visible: [testid=plate-result, text=Placa reconhecida]
        timeout_ms: 15000
  - name: time-tracking
    requires:
      - env: TESTSPRITE_DB_SEEDED
    steps:
      - use: login
        with: { EMAIL: operador@garagem40.test }
      - assert_text: { text: "Revisão inicial" }
"#;

    #[derive(Clone, Copy, PartialEq)]
    enum Role {
        Admin,
        Operator,
    }

    fn el(id: &str, tag: &str, selectors: &[Selector]) -> MockElement {
        selectors
            .iter()
            .fold(MockElement::new(id, tag), |e, s| e.matching(s.clone()))
    }

    /// Login page whose submit reveals the navigation; the stock page shows
    /// prices to admins only.
    fn garagem_app(role: Role) -> MockDriver {
        let driver = MockDriver::new();
        driver
            .add_element(el("email", "input", &[Selector::test_id("login-email")]))
            .add_element(el("password", "input", &[Selector::test_id("login-password")]))
            .add_element(el("submit", "button", &[Selector::test_id("login-submit")]).with_text("Entrar"))
            .on_click(
                "submit",
                vec![
                    MockEffect::Navigate("http://127.0.0.1:3000/dashboard".into()),
                    MockEffect::Show(el(
                        "nav",
                        "a",
                        &[Selector::test_id("nav-estoque"), Selector::text("Estoque")],
                    )),
                ],
            );
        let price = el(
            "price",
            "span",
            &[Selector::test_id("price-display"), Selector::text("R$")],
        )
        .with_text("R$ 120,00");
        let price = if role == Role::Admin { price } else { price.hidden() };
        driver.on_click("nav", vec![MockEffect::Show(price)]);
        driver
    }

    fn suite() -> Suite {
        Suite::from_yaml(SUITE).unwrap()
    }

    fn vars(suite: &Suite, name: &str, env: BTreeMap<String, String>) -> Variables {
        suite
            .variables_for(suite.scenario(name).unwrap())
            .with_env(move |key| env.get(key).cloned())
    }

    fn runner(factory: &Arc<MockSessionFactory>) -> ScenarioRunner {
        ScenarioRunner::new(
            Arc::clone(factory) as Arc<dyn SessionFactory>,
            HarnessConfig::default(),
        )
    }

    mod scenario_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_login_passes_without_retries() {
            let suite = suite();
            let factory = Arc::new(MockSessionFactory::new(|_| garagem_app(Role::Admin)));
            let scenario = suite.scenario("login-admin").unwrap();

            let result = runner(&factory)
                .run_with(scenario, &vars(&suite, "login-admin", BTreeMap::new()))
                .await;

            assert!(result.is_passed(), "{}", result.report_line());
            assert_eq!(result.steps.len(), 6);
            assert_eq!(result.total_retries(), 0);
            let driver = &factory.drivers()[0];
            assert_eq!(driver.value_of("email").as_deref(), Some("admin@garagem40.test"));
            assert_eq!(driver.value_of("password").as_deref(), Some("Test@12345"));
            assert!(driver.was_called("navigate:http://127.0.0.1:3000/login"));
            assert_eq!(factory.released(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_rbac_admin_sees_prices() {
            let suite = suite();
            let factory = Arc::new(MockSessionFactory::new(|_| garagem_app(Role::Admin)));
            let result = runner(&factory)
                .run_with(
                    suite.scenario("rbac-admin").unwrap(),
                    &vars(&suite, "rbac-admin", BTreeMap::new()),
                )
                .await;
            assert!(result.is_passed(), "{}", result.report_line());
        }

        #[tokio::test(start_paused = true)]
        async fn test_rbac_operator_does_not_see_prices() {
            let suite = suite();
            let factory = Arc::new(MockSessionFactory::new(|_| garagem_app(Role::Operator)));
            let result = runner(&factory)
                .run_with(
                    suite.scenario("rbac-operator").unwrap(),
                    &vars(&suite, "rbac-operator", BTreeMap::new()),
                )
                .await;
            assert!(result.is_passed(), "{}", result.report_line());
        }

        #[tokio::test(start_paused = true)]
        async fn test_rbac_negative_assertion_fails_when_price_visible() {
            let suite = suite();
            let factory = Arc::new(MockSessionFactory::new(|_| garagem_app(Role::Admin)));
            let result = runner(&factory)
                .run_with(
                    suite.scenario("rbac-operator").unwrap(),
                    &vars(&suite, "rbac-operator", BTreeMap::new()),
                )
                .await;
            assert!(!result.is_passed());
            let failure = result.failure.as_ref().unwrap();
            assert_eq!(failure.kind, Some(FailureKind::AssertionFailed));
            assert_eq!(failure.category, FailureCategory::Assertion);
            assert_eq!(failure.step, Some(7));
            assert_eq!(factory.released(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_plate_ocr_upload() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("CNH_fake.jpg"), b"jpeg").unwrap();
            let suite = suite();
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                driver.add_element(el("fab", "button", &[Selector::test_id("fab-new")]));
                driver.on_click(
                    "fab",
                    vec![MockEffect::Show(
                        el("scan", "button", &[Selector::test_id("btn-plate-scan")]).file_input(),
                    )],
                );
                driver.on_upload(vec![MockEffect::Show(
                    el("result", "div", &[Selector::text("Placa reconhecida")])
                        .with_text("Placa reconhecida: ABC1D23"),
                )]);
                driver
            }));

            let result = runner(&factory)
                .with_base_dir(dir.path())
                .run_with(
                    suite.scenario("plate-ocr").unwrap(),
                    &vars(&suite, "plate-ocr", BTreeMap::new()),
                )
                .await;

            assert!(result.is_passed(), "{}", result.report_line());
            let driver = &factory.drivers()[0];
            assert_eq!(driver.files_received(), vec![dir.path().join("CNH_fake.jpg")]);
            assert_eq!(driver.missed_choosers(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_plate_ocr_without_result_times_out_at_15s() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("CNH_fake.jpg"), b"jpeg").unwrap();
            let suite = suite();
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                driver
                    .add_element(el("fab", "button", &[Selector::test_id("fab-new")]))
                    .add_element(el("scan", "button", &[Selector::test_id("btn-plate-scan")]).file_input());
                driver
            }));

            let started = Instant::now();
            let result = runner(&factory)
                .with_base_dir(dir.path())
                .run_with(
                    suite.scenario("plate-ocr").unwrap(),
                    &vars(&suite, "plate-ocr", BTreeMap::new()),
                )
                .await;

            assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
            assert_eq!(result.steps.len(), 3);
            assert_eq!(result.steps[2].attempts, 1);
            assert!(started.elapsed() >= Duration::from_millis(15_000));
            assert_eq!(factory.drivers()[0].files_received().len(), 1);
        }

        #[tokio::test]
        async fn test_missing_seed_flag_runs_zero_steps() {
            let suite = suite();
            let factory = Arc::new(MockSessionFactory::new(|_| garagem_app(Role::Operator)));
            let result = runner(&factory)
                .run_with(
                    suite.scenario("time-tracking").unwrap(),
                    &vars(&suite, "time-tracking", BTreeMap::new()),
                )
                .await;

            assert_eq!(result.failure_kind(), Some(FailureKind::PreconditionMissing));
            assert!(result.steps.is_empty());
            assert!(result.diagnostic().contains("TESTSPRITE_DB_SEEDED"));
            assert!(result.diagnostic().starts_with("environment precondition failed"));
            assert_eq!(factory.acquired(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_seed_flag_present_runs() {
            let suite = suite();
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = garagem_app(Role::Operator);
                driver.add_element(
                    el("body", "body", &[Selector::css("body")]).with_text("Agenda: Revisão inicial, TEST001"),
                );
                driver
            }));
            let env = BTreeMap::from([("TESTSPRITE_DB_SEEDED".to_string(), "1".to_string())]);
            let result = runner(&factory)
                .run_with(
                    suite.scenario("time-tracking").unwrap(),
                    &vars(&suite, "time-tracking", env),
                )
                .await;
            assert!(result.is_passed(), "{}", result.report_line());
        }

        #[tokio::test]
        async fn test_unresolved_variable_is_precondition() {
            let scenario = Scenario::new("vars")
                .with_step(Step::new(StepAction::Navigate(crate::scenario::NavigateStep {
                    url: "${MISSING_PATH}".into(),
                    wait_until: crate::driver::LoadState::Load,
                })))
                .with_step(Step::new(StepAction::AssertVisible(Selector::text("x").into())));
            let factory = Arc::new(MockSessionFactory::new(|_| MockDriver::new()));
            let result = runner(&factory)
                .run_with(&scenario, &Variables::new().with_env(|_| None))
                .await;
            assert_eq!(result.failure_kind(), Some(FailureKind::PreconditionMissing));
            assert!(result.diagnostic().contains("MISSING_PATH"));
            assert_eq!(factory.acquired(), 0);
        }
    }

    mod execution_tests {
        use super::*;

        fn click_then_assert() -> Scenario {
            Scenario::new("click")
                .with_step(Step::new(StepAction::Click(Selector::test_id("save").into())))
                .with_step(Step::new(StepAction::AssertVisible(Selector::text("Salvo").into())))
        }

        fn save_button(driver: &MockDriver) {
            driver
                .add_element(el("save", "button", &[Selector::test_id("save")]))
                .on_click(
                    "save",
                    vec![MockEffect::Show(el("toast", "div", &[Selector::text("Salvo")]))],
                );
        }

        #[tokio::test(start_paused = true)]
        async fn test_transient_failures_are_retried() {
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                save_button(&driver);
                driver.inject_fault(MockOp::Click, "save", DriverError::Detached, 2);
                driver
            }));
            let result = runner(&factory).run(&click_then_assert()).await;
            assert!(result.is_passed(), "{}", result.report_line());
            assert_eq!(result.steps[0].attempts, 3);
            assert_eq!(result.total_retries(), 2);
            assert_eq!(factory.drivers()[0].call_count(MockOp::Click, "save"), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn test_exhausted_retries_fail_fast() {
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                save_button(&driver);
                driver.inject_fault(MockOp::Click, "save", DriverError::Detached, 5);
                driver
            }));
            let result = runner(&factory).run(&click_then_assert()).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::Detached));
            assert_eq!(result.steps.len(), 1);
            assert_eq!(result.steps[0].attempts, 3);
            assert_eq!(factory.drivers()[0].call_count(MockOp::Click, "save"), 3);
            assert_eq!(factory.released(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_disabled_control_not_retried() {
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                driver.add_element(el("save", "button", &[Selector::test_id("save")]).disabled());
                driver
            }));
            let result = runner(&factory).run(&click_then_assert()).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::ActionRejected));
            assert_eq!(result.steps[0].attempts, 1);
            assert!(result.report_line().contains("interaction failed: step 1 (click testid=save)"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_never_resolvable_is_not_found() {
            let factory = Arc::new(MockSessionFactory::new(|_| MockDriver::new()));
            let result = runner(&factory).run(&click_then_assert()).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::NotFound));
            assert_eq!(result.steps[0].attempts, 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_optional_step_failure_is_skipped() {
            let scenario = Scenario::new("overlay")
                .with_step(
                    Step::new(StepAction::Click(Selector::test_id("dismiss-overlay").into()))
                        .with_timeout(Duration::from_millis(500))
                        .optional(),
                )
                .with_step(Step::new(StepAction::Click(Selector::test_id("save").into())))
                .with_step(Step::new(StepAction::AssertVisible(Selector::text("Salvo").into())));
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                save_button(&driver);
                driver
            }));
            let result = runner(&factory).run(&scenario).await;
            assert!(result.is_passed(), "{}", result.report_line());
            assert!(result.steps[0].is_skipped());
        }

        #[tokio::test(start_paused = true)]
        async fn test_late_element_leaves_only_remaining_time_for_text() {
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                driver
                    .add_element(
                        el("status", "div", &[Selector::test_id("plate-status")]).with_text("Processando..."),
                    )
                    .appear_after("status", 18)
                    .add_element(MockElement::new("ocr-done", "button"))
                    .on_click(
                        "ocr-done",
                        vec![MockEffect::SetText {
                            id: "status".into(),
                            text: "Placa reconhecida: ABC1D23".into(),
                        }],
                    );
                let late = driver.clone();
                tokio::spawn(async move {
                    sleep(Duration::from_millis(1800)).await;
                    let _ = late.click(&ElementHandle::new("ocr-done", "button")).await;
                });
                driver
            }));
            let scenario = Scenario::new("late-text").with_step(
                Step::new(StepAction::WaitForText(crate::scenario::TextStep {
                    target: Selector::test_id("plate-status").into(),
                    text: "Placa reconhecida".into(),
                }))
                .with_timeout(Duration::from_millis(1000)),
            );

            let started = Instant::now();
            let result = runner(&factory).run(&scenario).await;

            assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
            assert_eq!(result.steps[0].attempts, 1);
            assert!(started.elapsed() <= Duration::from_millis(1100));
            assert!(factory.drivers()[0].lookups() >= 19);
        }

        #[tokio::test(start_paused = true)]
        async fn test_steps_run_in_order() {
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                save_button(&driver);
                driver
            }));
            let scenario = Scenario::new("order")
                .with_step(Step::new(StepAction::Navigate(crate::scenario::NavigateStep {
                    url: "/clientes".into(),
                    wait_until: crate::driver::LoadState::Load,
                })))
                .with_step(Step::new(StepAction::Click(Selector::test_id("save").into())))
                .with_step(Step::new(StepAction::AssertVisible(Selector::text("Salvo").into())));
            let result = runner(&factory).run(&scenario).await;
            assert!(result.is_passed());
            let history = factory.drivers()[0].history();
            let nav = history.iter().position(|c| c.starts_with("navigate:")).unwrap();
            let click = history.iter().position(|c| c == "click:save").unwrap();
            assert!(nav < click);
        }
    }

    mod session_lifecycle_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_release_once_on_pass() {
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                driver.add_element(el("ok", "div", &[Selector::text("ok")]));
                driver
            }));
            let scenario = Scenario::new("pass")
                .with_step(Step::new(StepAction::AssertVisible(Selector::text("ok").into())));
            assert!(runner(&factory).run(&scenario).await.is_passed());
            assert_eq!(factory.acquired(), 1);
            assert_eq!(factory.released(), 1);
            assert_eq!(factory.drivers()[0].close_count(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_release_once_on_failure_at_step_k() {
            let factory = Arc::new(MockSessionFactory::new(|_| MockDriver::new()));
            let scenario = Scenario::new("fail")
                .with_step(Step::new(StepAction::AssertVisible(Selector::text("never").into())));
            let result = runner(&factory).run(&scenario).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::AssertionFailed));
            assert_eq!(factory.released(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_release_once_on_panic() {
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                driver.panic_on_navigate();
                driver
            }));
            let scenario = Scenario::new("panics")
                .with_step(Step::new(StepAction::Navigate(crate::scenario::NavigateStep {
                    url: "/".into(),
                    wait_until: crate::driver::LoadState::Load,
                })))
                .with_step(Step::new(StepAction::AssertVisible(Selector::text("x").into())));
            let result = runner(&factory).run(&scenario).await;
            let failure = result.failure.as_ref().unwrap();
            assert_eq!(failure.category, FailureCategory::Harness);
            assert_eq!(failure.step, Some(0));
            assert!(failure.message.contains("mock driver panic"));
            assert_eq!(factory.released(), 1);
        }

        #[tokio::test]
        async fn test_acquisition_failure_is_harness_error() {
            let factory = Arc::new(MockSessionFactory::failing());
            let scenario = Scenario::new("no-browser")
                .with_step(Step::new(StepAction::AssertVisible(Selector::text("x").into())));
            let result = runner(&factory).run(&scenario).await;
            let failure = result.failure.as_ref().unwrap();
            assert_eq!(failure.category, FailureCategory::Harness);
            assert!(failure.message.contains("session acquisition failed"));
            assert_eq!(factory.released(), 0);
            assert!(result.steps.is_empty());
        }
    }

    mod suite_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_run_suite_keeps_order_and_isolates_sessions() {
            let scenarios: Vec<Scenario> = (0..4)
                .map(|i| {
                    Scenario::new(format!("s{i}"))
                        .with_step(Step::new(StepAction::AssertVisible(Selector::text("ok").into())))
                })
                .collect();
            let suite = Suite::new("parallel", scenarios);
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                driver.add_element(el("ok", "div", &[Selector::text("ok")]));
                driver
            }));
            let runner = ScenarioRunner::new(
                Arc::clone(&factory) as Arc<dyn SessionFactory>,
                HarnessConfig::default().with_concurrency(3),
            );

            let report = runner.run_suite(&suite).await;
            assert!(report.all_passed());
            let names: Vec<_> = report.results.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, ["s0", "s1", "s2", "s3"]);
            assert_eq!(factory.acquired(), 4);
            assert_eq!(factory.released(), 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_one_failure_does_not_stop_other_scenarios() {
            let suite = Suite::new(
                "mixed",
                vec![
                    Scenario::new("bad")
                        .with_step(Step::new(StepAction::AssertVisible(Selector::text("nope").into()))),
                    Scenario::new("good")
                        .with_step(Step::new(StepAction::AssertVisible(Selector::text("ok").into()))),
                ],
            );
            let factory = Arc::new(MockSessionFactory::new(|_| {
                let driver = MockDriver::new();
                driver.add_element(el("ok", "div", &[Selector::text("ok")]));
                driver
            }));
            let report = runner(&factory).run_suite(&suite).await;
            assert_eq!(report.passed_count(), 1);
            assert_eq!(report.failed_count(), 1);
            assert!(report.render_text().contains("bad  FAILED  assertion failed"));
        }
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Initializing.to_string(), "initializing");
        assert_eq!(RunState::Passed.to_string(), "passed");
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }
}
