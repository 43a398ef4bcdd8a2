//! Session: exclusive ownership of one browser context for one scenario.

use async_trait::async_trait;
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::driver::BrowserDriver;
use crate::result::{HarnessError, HarnessResult};

/// Hands out fresh sessions, one per scenario run
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Acquire a new session (launch browser / open context and page)
    async fn acquire(&self) -> HarnessResult<Session>;
}

/// A browser context owned by exactly one scenario run.
///
/// `release` consumes the session, so it can run at most once. Dropping a
/// session that was never released leaks the browser and logs a warning.
pub struct Session {
    id: Uuid,
    driver: Box<dyn BrowserDriver>,
    acquired_at: Instant,
    released: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wrap a driver in a new session
    #[must_use]
    pub fn new(driver: Box<dyn BrowserDriver>) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, "session acquired");
        Self {
            id,
            driver,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    /// Session id, used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The driver backing this session
    #[must_use]
    pub fn driver(&self) -> &dyn BrowserDriver {
        self.driver.as_ref()
    }

    /// Close the browser context
    ///
    /// # Errors
    ///
    /// Returns error if the driver fails to close; the session counts as
    /// released either way
    pub async fn release(mut self) -> HarnessResult<()> {
        self.released = true;
        let result = self.driver.close().await;
        debug!(
            session = %self.id,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "session released"
        );
        result.map_err(|e| HarnessError::session(format!("failed to close session {}: {e}", self.id)))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.released {
            warn!(session = %self.id, "session dropped without release");
        }
    }
}
