//! garagem-e2e: resilient UI-interaction harness for the Garagem40 app
//!
//! Scenarios are declarative step lists (YAML). Each scenario runs in its
//! own browser session; every element lookup goes through a ranked list of
//! selector strategies, and transient interaction failures are retried with
//! bounded backoff before the scenario is failed with a precise diagnostic.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     garagem-e2e Architecture                        │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────────┐   ┌───────────────────────┐   │
//! │  │ Suite      │   │ Scenario       │   │ Retry Controller      │   │
//! │  │ (YAML)     │──►│ Runner         │──►│  └► Locator Resolver  │   │
//! │  │            │   │ (per session)  │   │  └► Action Executor   │   │
//! │  └────────────┘   └────────────────┘   └──────────┬────────────┘   │
//! │                          │                        │                │
//! │                          ▼                        ▼                │
//! │                   ┌────────────┐         ┌─────────────────┐       │
//! │                   │ Suite      │         │ BrowserDriver   │       │
//! │                   │ Report     │         │ (Chromium/Mock) │       │
//! │                   └────────────┘         └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod action;
#[cfg(feature = "browser")]
#[allow(clippy::missing_errors_doc, clippy::doc_markdown)]
mod browser;
mod driver;
mod outcome;
mod report;
mod resolver;
mod result;
mod retry;
mod runner;
mod scenario;
mod selector;
mod session;

pub mod config;

#[allow(clippy::missing_panics_doc)]
pub mod mock;

pub use action::{Action, ActionExecutor};
#[cfg(feature = "browser")]
pub use browser::{ChromiumDriver, ChromiumSessionFactory};
pub use config::{BrowserSettings, HarnessConfig};
pub use driver::{
    BrowserDriver, DriverError, DriverResult, ElementHandle, ElementState, ElementWaitState,
    FileChooserTicket, LoadState,
};
pub use mock::{MockDriver, MockEffect, MockElement, MockOp, MockSessionFactory};
pub use outcome::{AttemptFailure, AttemptOutcome, FailureCategory, FailureKind};
pub use report::{
    ReportFormat, ScenarioFailure, ScenarioResult, ScenarioStatus, StepRecord, SuiteReport,
};
pub use resolver::{LocatorResolver, ResolvedElement, DEFAULT_POLL_INTERVAL};
pub use result::{HarnessError, HarnessResult};
pub use retry::{Backoff, RetryController, RetryPolicy, RetryReport};
pub use runner::{RunState, ScenarioRunner};
pub use scenario::{
    FillStep, NavigateStep, Precondition, Scenario, Step, StepAction, StepKind, Suite,
    SuiteDefaults, TextStep, UploadStep, ValidationWarning, Variables,
};
pub use selector::{Selector, SelectorCandidate, SelectorStrategy};
pub use session::{Session, SessionFactory};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        AttemptOutcome, BrowserDriver, FailureKind, HarnessConfig, HarnessError, HarnessResult,
        Scenario, ScenarioResult, ScenarioRunner, Selector, SelectorCandidate, SessionFactory,
        Step, StepAction, Suite, SuiteReport,
    };
    #[cfg(feature = "browser")]
    pub use super::ChromiumSessionFactory;
}
