//! BrowserDriver - abstract browser automation boundary.
//!
//! The harness only talks to the browser through this trait, so scenarios can
//! run against the chromiumoxide-backed [`ChromiumDriver`](crate::ChromiumDriver)
//! or the scriptable [`MockDriver`](crate::MockDriver) used in tests.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  BrowserDriver (async trait, &self methods)                      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐          ┌──────────────────────┐      │
//! │  │  ChromiumDriver      │          │  MockDriver          │      │
//! │  │  CDP via             │          │  in-memory DOM with  │      │
//! │  │  chromiumoxide       │          │  fault injection     │      │
//! │  └──────────────────────┘          └──────────────────────┘      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Drivers are assumed reliable at the protocol level. Application timing
//! (late renders, detached nodes, navigation in flight) surfaces as
//! [`DriverError`] values that the action executor reclassifies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::selector::Selector;

/// Handle to an element found by a lookup.
///
/// Handles go stale when the DOM mutates; the harness re-resolves on every
/// attempt instead of caching them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Driver-specific identifier
    pub id: String,
    /// Element tag name, lowercase
    pub tag_name: String,
}

impl ElementHandle {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag_name: tag_name.into(),
        }
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}#{}>", self.tag_name, self.id)
    }
}

/// Snapshot of an element's actionability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementState {
    /// Still connected to the document
    pub attached: bool,
    /// Rendered with a non-empty box and not hidden by CSS
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
}

impl ElementState {
    /// Attached, visible and enabled
    #[must_use]
    pub const fn ready() -> Self {
        Self {
            attached: true,
            visible: true,
            enabled: true,
        }
    }

    /// Removed from the document
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            attached: false,
            visible: false,
            enabled: false,
        }
    }

    /// Can be resolved by the locator
    #[must_use]
    pub const fn is_resolvable(&self) -> bool {
        self.attached && self.visible
    }
}

/// Page load states (Playwright parity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Wait for the `load` event to fire
    Load,
    /// Wait for `DOMContentLoaded` event
    #[default]
    DomContentLoaded,
    /// Wait for network to be idle (no requests for 500ms)
    NetworkIdle,
}

impl LoadState {
    /// Get the event name for this load state
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "domcontentloaded",
            Self::NetworkIdle => "networkidle",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Element state targeted by `wait_for_selector`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementWaitState {
    /// Present in the DOM
    Attached,
    /// Present and visible
    Visible,
    /// Absent or not visible
    Hidden,
}

/// Token returned by `intercept_file_chooser`, redeemed once the chooser opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileChooserTicket(pub u64);

/// Raw failures reported by a driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Element was removed from the DOM
    #[error("element is detached from the document")]
    Detached,

    /// Element exists but is not visible
    #[error("element is not visible")]
    NotVisible,

    /// Element refused interaction
    #[error("element is disabled")]
    Disabled,

    /// Driver-side wait exceeded its deadline
    #[error("timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Navigation failed
    #[error("navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Protocol or page-level error
    #[error("protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// Browser or page already closed
    #[error("browser session is closed")]
    Closed,
}

impl DriverError {
    /// Create a protocol error
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            ms: after.as_millis() as u64,
        }
    }
}

/// Result type for driver calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Abstract driver trait for browser automation.
///
/// All methods take `&self`: one session is driven by one scenario at a time,
/// and implementations synchronize internally.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate to a URL and wait for the given load state
    async fn navigate(&self, url: &str, wait_until: LoadState, timeout: Duration)
        -> DriverResult<()>;

    /// All elements matching the selector, in document order
    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<ElementHandle>>;

    /// Current actionability of a handle
    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState>;

    /// Text content of an element
    async fn text_content(&self, element: &ElementHandle) -> DriverResult<String>;

    /// Replace the value of an input with text
    async fn fill(&self, element: &ElementHandle, text: &str) -> DriverResult<()>;

    /// Click an element
    async fn click(&self, element: &ElementHandle) -> DriverResult<()>;

    /// Start intercepting the next file-chooser dialog.
    ///
    /// Must be called before the click that opens the chooser; a chooser that
    /// opens without an armed interception is lost.
    async fn intercept_file_chooser(&self) -> DriverResult<FileChooserTicket>;

    /// Wait until the intercepted chooser opens
    async fn await_file_chooser(
        &self,
        ticket: FileChooserTicket,
        timeout: Duration,
    ) -> DriverResult<()>;

    /// Supply a file to an opened chooser
    async fn set_chooser_files(&self, ticket: FileChooserTicket, path: &Path) -> DriverResult<()>;

    /// Drop an interception that will not be redeemed and stop intercepting
    /// once none is outstanding. Unknown tickets are ignored.
    async fn cancel_file_chooser(&self, ticket: FileChooserTicket) -> DriverResult<()>;

    /// Wait for an element matching the selector to reach a state
    async fn wait_for_selector(
        &self,
        selector: &Selector,
        state: ElementWaitState,
        timeout: Duration,
    ) -> DriverResult<()>;

    /// Wait for the page to reach a load state
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> DriverResult<()>;

    /// Current page URL
    async fn current_url(&self) -> DriverResult<String>;

    /// Close the page, context and browser
    async fn close(&self) -> DriverResult<()>;
}
