//! Action Executor: perform one UI action against a resolved element.
//!
//! Every call is bounded by a timeout and every driver error is reclassified
//! into an [`AttemptOutcome`]; nothing raw escapes to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::driver::{BrowserDriver, DriverError, ElementHandle};
use crate::outcome::{AttemptFailure, AttemptOutcome, FailureKind};
use crate::resolver::DEFAULT_POLL_INTERVAL;

/// A single UI action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Replace the element's value with text
    Fill(String),
    /// Click the element
    Click,
    /// Click the element and feed the opened file chooser
    UploadFile(PathBuf),
    /// Wait until the element is visible
    WaitForVisible,
    /// Wait until the element's text contains a substring
    WaitForText(String),
}

impl Action {
    /// Short action name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Fill(_) => "fill",
            Self::Click => "click",
            Self::UploadFile(_) => "upload",
            Self::WaitForVisible => "wait_for_visible",
            Self::WaitForText(_) => "wait_for_text",
        }
    }

    /// Actions that require an enabled element
    #[must_use]
    pub const fn needs_enabled(&self) -> bool {
        matches!(self, Self::Fill(_) | Self::Click | Self::UploadFile(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fill(text) => write!(f, "fill({} chars)", text.chars().count()),
            Self::Click => f.write_str("click"),
            Self::UploadFile(path) => write!(f, "upload({})", path.display()),
            Self::WaitForVisible => f.write_str("wait_for_visible"),
            Self::WaitForText(text) => write!(f, "wait_for_text({text:?})"),
        }
    }
}

/// Executes actions through a driver
#[derive(Debug, Clone, Copy)]
pub struct ActionExecutor {
    poll_interval: Duration,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionExecutor {
    /// Create an executor with the default poll interval
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the interval used by waiting actions
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Perform `action` on `element`, bounded by `limit`
    pub async fn act(
        &self,
        driver: &dyn BrowserDriver,
        element: &ElementHandle,
        action: &Action,
        limit: Duration,
    ) -> AttemptOutcome {
        debug!(action = %action, element = %element, "performing action");
        let performed = self.perform(driver, element, action, limit);
        if matches!(action, Action::UploadFile(_)) {
            // Bounded inside, so the interception is cancelled on timeout.
            return performed.await.into();
        }
        match timeout(limit, performed).await {
            Ok(result) => result.into(),
            Err(_) => AttemptOutcome::failure(
                FailureKind::Timeout,
                format!("{} on {element} did not complete within {}ms", action.name(), limit.as_millis()),
            ),
        }
    }

    async fn perform(
        &self,
        driver: &dyn BrowserDriver,
        element: &ElementHandle,
        action: &Action,
        limit: Duration,
    ) -> Result<(), AttemptFailure> {
        if action.needs_enabled() {
            Self::check_actionable(driver, element).await?;
        }
        match action {
            Action::Fill(text) => driver.fill(element, text).await.map_err(reclassify),
            Action::Click => driver.click(element).await.map_err(reclassify),
            Action::UploadFile(path) => Self::upload(driver, element, path, limit).await,
            Action::WaitForVisible => {
                self.poll(limit, move || async move {
                    let state = driver.element_state(element).await.map_err(reclassify)?;
                    if !state.attached {
                        return Err(AttemptFailure::from_driver(&DriverError::Detached));
                    }
                    Ok(state.visible)
                })
                .await
            }
            Action::WaitForText(expected) => {
                self.poll(limit, move || async move {
                    let text = driver.text_content(element).await.map_err(reclassify)?;
                    Ok(text.contains(expected.as_str()))
                })
                .await
            }
        }
    }

    /// Click `element` and feed `path` to the chooser it opens. The
    /// interception is cancelled on every failure, timeouts included.
    async fn upload(
        driver: &dyn BrowserDriver,
        element: &ElementHandle,
        path: &Path,
        limit: Duration,
    ) -> Result<(), AttemptFailure> {
        let deadline = Instant::now() + limit;
        if !path.is_file() {
            return Err(AttemptFailure::new(
                FailureKind::PreconditionMissing,
                format!("upload file {} does not exist", path.display()),
            ));
        }
        // The interception must be armed before the click that opens the chooser.
        let ticket = driver.intercept_file_chooser().await.map_err(reclassify)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let fed = timeout(remaining, async {
            driver.click(element).await?;
            let left = deadline.saturating_duration_since(Instant::now());
            driver.await_file_chooser(ticket, left).await?;
            driver.set_chooser_files(ticket, path).await
        })
        .await
        .unwrap_or_else(|_| Err(DriverError::timeout(limit)));

        if let Err(error) = fed {
            if let Err(cancel) = driver.cancel_file_chooser(ticket).await {
                warn!(error = %cancel, "failed to cancel file chooser interception");
            }
            return Err(reclassify(error));
        }
        Ok(())
    }

    async fn check_actionable(
        driver: &dyn BrowserDriver,
        element: &ElementHandle,
    ) -> Result<(), AttemptFailure> {
        let state = driver.element_state(element).await.map_err(reclassify)?;
        let error = if !state.attached {
            DriverError::Detached
        } else if !state.visible {
            DriverError::NotVisible
        } else if !state.enabled {
            DriverError::Disabled
        } else {
            return Ok(());
        };
        Err(AttemptFailure::new(
            FailureKind::from_driver(&error),
            format!("{element}: {error}"),
        ))
    }

    /// Poll `check` until it reports true. The outer timeout in `act` bounds
    /// this loop; the local deadline only shapes the final message.
    async fn poll<F, Fut>(&self, limit: Duration, mut check: F) -> Result<(), AttemptFailure>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<bool, AttemptFailure>>,
    {
        let deadline = Instant::now() + limit;
        loop {
            if check().await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AttemptFailure::from_driver(&DriverError::timeout(limit)));
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

fn reclassify(error: DriverError) -> AttemptFailure {
    AttemptFailure::from_driver(&error)
}
