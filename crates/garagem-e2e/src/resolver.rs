//! Locator Resolver: turn a selector candidate into one live element.
//!
//! ```text
//! round:  strategy[0] ──► find_elements ──► first attached+visible? ──► win
//!              │ no match / only hidden
//!              ▼
//!         strategy[1] ──► ...
//!
//! resolve: repeat rounds every poll interval until the deadline
//! ```
//!
//! The earlier strategy in the list always wins when several match: the list
//! order is the robustness preference. Within one strategy the first element
//! in document order wins.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::driver::{BrowserDriver, DriverError, ElementHandle};
use crate::outcome::{AttemptFailure, FailureKind};
use crate::selector::{Selector, SelectorCandidate};

/// Default interval between resolution rounds
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An element found by the resolver, and the strategy that found it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    /// Live handle; valid for the current attempt only
    pub handle: ElementHandle,
    /// Position of the winning strategy in the candidate list
    pub strategy_index: usize,
    /// The winning selector
    pub selector: Selector,
}

impl ResolvedElement {
    /// True when a fallback strategy was needed
    #[must_use]
    pub const fn used_fallback(&self) -> bool {
        self.strategy_index > 0
    }
}

#[derive(Debug)]
enum Round {
    Found(ResolvedElement),
    HiddenOnly,
    Nothing,
}

/// Locator resolver
#[derive(Debug, Clone, Copy)]
pub struct LocatorResolver {
    poll_interval: Duration,
}

impl Default for LocatorResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LocatorResolver {
    /// Resolver with the default poll interval
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the interval between rounds
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Interval between rounds
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Resolve the candidate to an attached, visible element before `timeout`.
    ///
    /// Always performs at least one round, so a zero timeout is a single lookup.
    ///
    /// # Errors
    ///
    /// `NotVisible` when the last round matched only hidden or detached
    /// elements, `NotFound` when nothing matched, `ActionRejected` when the
    /// session is closed.
    pub async fn resolve(
        &self,
        driver: &dyn BrowserDriver,
        candidate: &SelectorCandidate,
        timeout: Duration,
    ) -> Result<ResolvedElement, AttemptFailure> {
        let deadline = Instant::now() + timeout;
        let mut rounds = 0u32;
        let mut last_error: Option<DriverError> = None;

        loop {
            rounds += 1;
            let hidden_only = match self.round(driver, candidate).await {
                Ok(Round::Found(resolved)) => {
                    if resolved.used_fallback() {
                        debug!(
                            candidate = %candidate,
                            selector = %resolved.selector,
                            strategy_index = resolved.strategy_index,
                            "resolved via fallback strategy"
                        );
                    }
                    return Ok(resolved);
                }
                Ok(Round::HiddenOnly) => true,
                Ok(Round::Nothing) => false,
                Err(DriverError::Closed) => {
                    return Err(AttemptFailure::from_driver(&DriverError::Closed));
                }
                Err(error) => {
                    trace!(candidate = %candidate, %error, "lookup failed, retrying round");
                    last_error = Some(error);
                    false
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(Self::deadline_failure(
                    candidate,
                    timeout,
                    rounds,
                    hidden_only,
                    last_error.as_ref(),
                ));
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Single non-waiting round. `Ok(None)` means nothing visible matched.
    ///
    /// # Errors
    ///
    /// Driver failures during the lookup, reclassified.
    pub async fn locate_once(
        &self,
        driver: &dyn BrowserDriver,
        candidate: &SelectorCandidate,
    ) -> Result<Option<ResolvedElement>, AttemptFailure> {
        match self.round(driver, candidate).await {
            Ok(Round::Found(resolved)) => Ok(Some(resolved)),
            Ok(Round::HiddenOnly | Round::Nothing) => Ok(None),
            Err(error) => Err(AttemptFailure::from_driver(&error)),
        }
    }

    async fn round(
        &self,
        driver: &dyn BrowserDriver,
        candidate: &SelectorCandidate,
    ) -> Result<Round, DriverError> {
        let mut saw_hidden = false;
        for (strategy_index, selector) in candidate.selectors().iter().enumerate() {
            for handle in driver.find_elements(selector).await? {
                let state = driver.element_state(&handle).await?;
                if state.is_resolvable() {
                    return Ok(Round::Found(ResolvedElement {
                        handle,
                        strategy_index,
                        selector: selector.clone(),
                    }));
                }
                saw_hidden = true;
            }
        }
        Ok(if saw_hidden {
            Round::HiddenOnly
        } else {
            Round::Nothing
        })
    }

    fn deadline_failure(
        candidate: &SelectorCandidate,
        timeout: Duration,
        rounds: u32,
        hidden_only: bool,
        last_error: Option<&DriverError>,
    ) -> AttemptFailure {
        if hidden_only {
            return AttemptFailure::new(
                FailureKind::NotVisible,
                format!(
                    "{candidate} matched only hidden elements after {}ms",
                    timeout.as_millis()
                ),
            );
        }
        let mut message = format!(
            "no strategy matched {candidate} within {}ms ({rounds} rounds)",
            timeout.as_millis()
        );
        if let Some(error) = last_error {
            message.push_str(&format!("; last lookup error: {error}"));
        }
        AttemptFailure::new(FailureKind::NotFound, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDriver, MockElement};
    use proptest::prelude::*;

    fn candidate(raw: &[&str]) -> SelectorCandidate {
        SelectorCandidate::parse(raw).unwrap()
    }

    mod ordering_tests {
        use super::*;

        #[tokio::test]
        async fn test_first_strategy_wins_when_both_match() {
            let driver = MockDriver::new();
            driver
                .add_element(MockElement::new("by-text", "button").matching(Selector::text("Entrar")))
                .add_element(
                    MockElement::new("by-id", "button").matching(Selector::test_id("login-submit")),
                );

            let resolved = LocatorResolver::new()
                .resolve(
                    &driver,
                    &candidate(&["testid=login-submit", "text=Entrar"]),
                    Duration::ZERO,
                )
                .await
                .unwrap();
            assert_eq!(resolved.handle.id, "by-id");
            assert_eq!(resolved.strategy_index, 0);
            assert!(!resolved.used_fallback());
        }

        #[tokio::test]
        async fn test_falls_back_to_later_strategy() {
            let driver = MockDriver::new();
            driver.add_element(
                MockElement::new("email", "input").matching(Selector::xpath("//input[@type=\"email\"]")),
            );

            let resolved = LocatorResolver::new()
                .resolve(
                    &driver,
                    &candidate(&["testid=login-email", "//input[@type=\"email\"]"]),
                    Duration::ZERO,
                )
                .await
                .unwrap();
            assert_eq!(resolved.handle.id, "email");
            assert_eq!(resolved.strategy_index, 1);
            assert!(resolved.used_fallback());
        }

        #[tokio::test]
        async fn test_first_in_document_order() {
            let driver = MockDriver::new();
            driver
                .add_element(MockElement::new("first", "a").matching(Selector::css("nav a")))
                .add_element(MockElement::new("second", "a").matching(Selector::css("nav a")));

            let resolved = LocatorResolver::new()
                .resolve(&driver, &candidate(&["css=nav a"]), Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(resolved.handle.id, "first");
        }

        #[tokio::test]
        async fn test_hidden_match_skipped_for_visible_one() {
            let driver = MockDriver::new();
            driver
                .add_element(MockElement::new("ghost", "a").matching(Selector::css("a")).hidden())
                .add_element(MockElement::new("real", "a").matching(Selector::css("a")));

            let resolved = LocatorResolver::new()
                .resolve(&driver, &candidate(&["css=a"]), Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(resolved.handle.id, "real");
        }

        #[tokio::test]
        async fn test_resolve_is_idempotent_on_unchanged_dom() {
            let driver = MockDriver::new();
            driver.add_element(MockElement::new("nav", "a").matching(Selector::text("Estoque")));
            let resolver = LocatorResolver::new();
            let c = candidate(&["testid=nav-estoque", "text=Estoque"]);

            let first = resolver.resolve(&driver, &c, Duration::ZERO).await.unwrap();
            let second = resolver.resolve(&driver, &c, Duration::ZERO).await.unwrap();
            assert_eq!(first.selector, second.selector);
            assert_eq!(first.strategy_index, second.strategy_index);
        }
    }

    mod deadline_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_not_found_after_deadline() {
            let driver = MockDriver::new();
            let started = Instant::now();
            let failure = LocatorResolver::new()
                .resolve(&driver, &candidate(&["testid=missing"]), Duration::from_millis(200))
                .await
                .unwrap_err();
            assert_eq!(failure.kind, FailureKind::NotFound);
            assert!(failure.message.contains("testid=missing"));
            assert!(started.elapsed() >= Duration::from_millis(200));
            assert!(driver.lookups() >= 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_hidden_only_is_not_visible() {
            let driver = MockDriver::new();
            driver.add_element(
                MockElement::new("price", "span")
                    .matching(Selector::test_id("price-display"))
                    .hidden(),
            );
            let failure = LocatorResolver::new()
                .resolve(&driver, &candidate(&["testid=price-display"]), Duration::from_millis(100))
                .await
                .unwrap_err();
            assert_eq!(failure.kind, FailureKind::NotVisible);
        }

        #[tokio::test(start_paused = true)]
        async fn test_late_element_resolves_within_deadline() {
            let driver = MockDriver::new();
            driver
                .add_element(MockElement::new("toast", "div").matching(Selector::text("Salvo")))
                .appear_after("toast", 3);
            let resolved = LocatorResolver::new()
                .resolve(&driver, &candidate(&["text=Salvo"]), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(resolved.handle.id, "toast");
            assert_eq!(driver.lookups(), 4);
        }

        #[tokio::test]
        async fn test_closed_session_is_rejected() {
            let driver = MockDriver::new();
            driver.close().await.unwrap();
            let failure = LocatorResolver::new()
                .resolve(&driver, &candidate(&["css=a"]), Duration::from_secs(5))
                .await
                .unwrap_err();
            assert_eq!(failure.kind, FailureKind::ActionRejected);
        }
    }

    mod single_round_tests {
        use super::*;

        #[tokio::test]
        async fn test_locate_once_does_not_wait() {
            let driver = MockDriver::new();
            driver.add_element(MockElement::new("x", "span").matching(Selector::text("R$")).hidden());
            let found = LocatorResolver::new()
                .locate_once(&driver, &candidate(&["text=R$"]))
                .await
                .unwrap();
            assert!(found.is_none());
            assert_eq!(driver.lookups(), 1);
        }
    }

    proptest! {
        #[test]
        fn prop_earliest_matching_strategy_wins(matches in proptest::collection::vec(any::<bool>(), 1..6)) {
            prop_assume!(matches.iter().any(|m| *m));
            let driver = MockDriver::new();
            let mut selectors = Vec::new();
            for (i, present) in matches.iter().enumerate() {
                let selector = Selector::test_id(format!("s{i}"));
                if *present {
                    driver.add_element(MockElement::new(format!("e{i}"), "div").matching(selector.clone()));
                }
                selectors.push(selector);
            }
            let c = SelectorCandidate::new(selectors).unwrap();
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let resolved = rt
                .block_on(LocatorResolver::new().resolve(&driver, &c, Duration::ZERO))
                .unwrap();
            let expected = matches.iter().position(|m| *m).unwrap();
            prop_assert_eq!(resolved.strategy_index, expected);
            prop_assert_eq!(resolved.handle.id, format!("e{expected}"));
        }
    }
}
