//! Scriptable in-memory driver for unit tests and dry runs.
//!
//! A `MockDriver` is a cheap handle over shared state: clone it before handing
//! it to a [`Session`](crate::Session) and the clone can still inspect call
//! history, files received by the chooser, and close counts afterwards.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::driver::{
    BrowserDriver, DriverError, DriverResult, ElementHandle, ElementState, ElementWaitState,
    FileChooserTicket, LoadState,
};
use crate::result::HarnessResult;
use crate::selector::Selector;
use crate::session::{Session, SessionFactory};

const MOCK_POLL: Duration = Duration::from_millis(10);

/// Element in the mock DOM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockElement {
    /// Identifier, also used as the handle id
    pub id: String,
    /// Tag name
    pub tag_name: String,
    /// Text content
    pub text: String,
    /// Actionability
    pub state: ElementState,
    /// Selectors this element answers to
    pub selectors: Vec<Selector>,
    /// Clicking opens a file chooser
    pub opens_file_chooser: bool,
}

impl MockElement {
    /// Create a visible, enabled element
    #[must_use]
    pub fn new(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag_name: tag_name.into(),
            text: String::new(),
            state: ElementState::ready(),
            selectors: Vec::new(),
            opens_file_chooser: false,
        }
    }

    /// Add a selector this element matches
    #[must_use]
    pub fn matching(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// Set text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Mark as hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.state.visible = false;
        self
    }

    /// Mark as disabled
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.state.enabled = false;
        self
    }

    /// Clicking this element opens a file chooser
    #[must_use]
    pub const fn file_input(mut self) -> Self {
        self.opens_file_chooser = true;
        self
    }

    fn handle(&self) -> ElementHandle {
        ElementHandle::new(self.id.clone(), self.tag_name.clone())
    }
}

/// DOM mutation applied after a click or an upload
#[derive(Debug, Clone)]
pub enum MockEffect {
    /// Insert an element
    Show(MockElement),
    /// Make an element invisible
    Hide(String),
    /// Detach an element
    Remove(String),
    /// Replace an element's text
    SetText {
        /// Element id
        id: String,
        /// New text
        text: String,
    },
    /// Change the current URL
    Navigate(String),
}

/// Operations that accept injected faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `click`
    Click,
    /// `fill`
    Fill,
    /// `text_content`
    Text,
    /// `navigate`
    Navigate,
}

#[derive(Debug, Default)]
struct ChooserState {
    next_ticket: u64,
    armed: Option<u64>,
    opened: Option<u64>,
    missed: usize,
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    elements: Vec<MockElement>,
    hidden_lookups: HashMap<String, usize>,
    faults: HashMap<(MockOp, String), VecDeque<DriverError>>,
    click_effects: HashMap<String, Vec<MockEffect>>,
    upload_effects: Vec<MockEffect>,
    chooser: ChooserState,
    files_received: Vec<PathBuf>,
    values: HashMap<String, String>,
    calls: HashMap<(MockOp, String), usize>,
    lookups: usize,
    history: Vec<String>,
    panic_on_navigate: bool,
    closed: bool,
    close_count: usize,
}

impl MockState {
    fn apply(&mut self, effects: Vec<MockEffect>) {
        for effect in effects {
            match effect {
                MockEffect::Show(element) => {
                    self.elements.retain(|e| e.id != element.id);
                    self.elements.push(element);
                }
                MockEffect::Hide(id) => {
                    if let Some(e) = self.elements.iter_mut().find(|e| e.id == id) {
                        e.state.visible = false;
                    }
                }
                MockEffect::Remove(id) => self.elements.retain(|e| e.id != id),
                MockEffect::SetText { id, text } => {
                    if let Some(e) = self.elements.iter_mut().find(|e| e.id == id) {
                        e.text = text;
                    }
                }
                MockEffect::Navigate(url) => self.url = url,
            }
        }
    }

    fn take_fault(&mut self, op: MockOp, key: &str) -> DriverResult<()> {
        *self.calls.entry((op, key.to_string())).or_insert(0) += 1;
        match self
            .faults
            .get_mut(&(op, key.to_string()))
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn element(&self, id: &str) -> Option<&MockElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    fn actionable(&self, id: &str) -> DriverResult<&MockElement> {
        let element = self.element(id).ok_or(DriverError::Detached)?;
        if !element.state.attached {
            return Err(DriverError::Detached);
        }
        if !element.state.visible {
            return Err(DriverError::NotVisible);
        }
        if !element.state.enabled {
            return Err(DriverError::Disabled);
        }
        Ok(element)
    }

    fn check_open(&self) -> DriverResult<()> {
        if self.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn matches_state(&self, selector: &Selector, state: ElementWaitState) -> bool {
        let mut matching = self
            .elements
            .iter()
            .filter(|e| e.selectors.contains(selector) && e.state.attached);
        match state {
            ElementWaitState::Attached => matching.next().is_some(),
            ElementWaitState::Visible => matching.any(|e| e.state.visible),
            ElementWaitState::Hidden => !matching.any(|e| e.state.visible),
        }
    }
}

/// Mock driver for unit testing
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    release_counter: Option<Arc<AtomicUsize>>,
}

impl MockDriver {
    /// Create an empty mock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an element at the end of the document
    pub fn add_element(&self, element: MockElement) -> &Self {
        self.lock().elements.push(element);
        self
    }

    /// Hide the element from lookups for the first `lookups` finds
    pub fn appear_after(&self, id: impl Into<String>, lookups: usize) -> &Self {
        self.lock().hidden_lookups.insert(id.into(), lookups);
        self
    }

    /// Queue `times` copies of an error for an operation on an element
    /// (or on a URL, for [`MockOp::Navigate`])
    pub fn inject_fault(
        &self,
        op: MockOp,
        key: impl Into<String>,
        error: DriverError,
        times: usize,
    ) -> &Self {
        self.lock()
            .faults
            .entry((op, key.into()))
            .or_default()
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Apply effects after an element is clicked
    pub fn on_click(&self, id: impl Into<String>, effects: Vec<MockEffect>) -> &Self {
        self.lock()
            .click_effects
            .entry(id.into())
            .or_default()
            .extend(effects);
        self
    }

    /// Apply effects after files reach the chooser
    pub fn on_upload(&self, effects: Vec<MockEffect>) -> &Self {
        self.lock().upload_effects.extend(effects);
        self
    }

    /// Panic inside `navigate` (simulates a harness bug)
    pub fn panic_on_navigate(&self) -> &Self {
        self.lock().panic_on_navigate = true;
        self
    }

    /// Count releases through a shared counter
    #[must_use]
    pub fn with_release_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.release_counter = Some(counter);
        self
    }

    /// Recorded calls, in order
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Check if a call with this prefix was recorded
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.lock().history.iter().any(|c| c.starts_with(prefix))
    }

    /// How many times an operation was invoked on an element
    #[must_use]
    pub fn call_count(&self, op: MockOp, key: &str) -> usize {
        self.lock()
            .calls
            .get(&(op, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total `find_elements` calls
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lock().lookups
    }

    /// Files supplied to intercepted choosers
    #[must_use]
    pub fn files_received(&self) -> Vec<PathBuf> {
        self.lock().files_received.clone()
    }

    /// Choosers that opened without an armed interception
    #[must_use]
    pub fn missed_choosers(&self) -> usize {
        self.lock().chooser.missed
    }

    /// A chooser interception is still outstanding
    #[must_use]
    pub fn chooser_armed(&self) -> bool {
        self.lock().chooser.armed.is_some()
    }

    /// Value last filled into an element
    #[must_use]
    pub fn value_of(&self, id: &str) -> Option<String> {
        self.lock().values.get(id).cloned()
    }

    /// Times `close` was called
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Current URL
    #[must_use]
    pub fn url(&self) -> String {
        self.lock().url.clone()
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(
        &self,
        url: &str,
        wait_until: LoadState,
        _timeout: Duration,
    ) -> DriverResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.history.push(format!("navigate:{url}"));
        assert!(!state.panic_on_navigate, "mock driver panic on navigate");
        state.take_fault(MockOp::Navigate, url)?;
        state.history.push(format!("load_state:{wait_until}"));
        state.url = url.to_string();
        Ok(())
    }

    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<ElementHandle>> {
        let mut state = self.lock();
        state.check_open()?;
        state.lookups += 1;
        let mut found = Vec::new();
        let ids: Vec<String> = state
            .elements
            .iter()
            .filter(|e| e.selectors.contains(selector))
            .map(|e| e.id.clone())
            .collect();
        for id in ids {
            if let Some(remaining) = state.hidden_lookups.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    continue;
                }
            }
            if let Some(element) = state.element(&id) {
                found.push(element.handle());
            }
        }
        Ok(found)
    }

    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState> {
        let state = self.lock();
        state.check_open()?;
        Ok(state
            .element(&element.id)
            .map_or_else(ElementState::detached, |e| e.state))
    }

    async fn text_content(&self, element: &ElementHandle) -> DriverResult<String> {
        let mut state = self.lock();
        state.check_open()?;
        state.take_fault(MockOp::Text, &element.id)?;
        state
            .element(&element.id)
            .map(|e| e.text.clone())
            .ok_or(DriverError::Detached)
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.take_fault(MockOp::Fill, &element.id)?;
        state.actionable(&element.id)?;
        state.history.push(format!("fill:{}={text}", element.id));
        state.values.insert(element.id.clone(), text.to_string());
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.take_fault(MockOp::Click, &element.id)?;
        let opens_chooser = state.actionable(&element.id)?.opens_file_chooser;
        state.history.push(format!("click:{}", element.id));
        if opens_chooser {
            match state.chooser.armed {
                Some(ticket) => state.chooser.opened = Some(ticket),
                None => state.chooser.missed += 1,
            }
        }
        let effects = state.click_effects.remove(&element.id).unwrap_or_default();
        state.apply(effects);
        Ok(())
    }

    async fn intercept_file_chooser(&self) -> DriverResult<FileChooserTicket> {
        let mut state = self.lock();
        state.check_open()?;
        state.chooser.next_ticket += 1;
        let ticket = state.chooser.next_ticket;
        state.chooser.armed = Some(ticket);
        state.chooser.opened = None;
        state.history.push("intercept_file_chooser".to_string());
        Ok(FileChooserTicket(ticket))
    }

    async fn await_file_chooser(
        &self,
        ticket: FileChooserTicket,
        timeout: Duration,
    ) -> DriverResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let state = self.lock();
                state.check_open()?;
                if state.chooser.opened == Some(ticket.0) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::timeout(timeout));
            }
            tokio::time::sleep(MOCK_POLL).await;
        }
    }

    async fn set_chooser_files(&self, ticket: FileChooserTicket, path: &Path) -> DriverResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        if state.chooser.opened != Some(ticket.0) {
            return Err(DriverError::protocol("no file chooser is open for this ticket"));
        }
        state.chooser.armed = None;
        state.chooser.opened = None;
        state.history.push(format!("set_files:{}", path.display()));
        state.files_received.push(path.to_path_buf());
        let effects = std::mem::take(&mut state.upload_effects);
        state.apply(effects);
        Ok(())
    }

    async fn cancel_file_chooser(&self, ticket: FileChooserTicket) -> DriverResult<()> {
        let mut state = self.lock();
        state.history.push("cancel_file_chooser".to_string());
        if state.chooser.armed == Some(ticket.0) {
            state.chooser.armed = None;
            state.chooser.opened = None;
        }
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &Selector,
        wait_state: ElementWaitState,
        timeout: Duration,
    ) -> DriverResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let state = self.lock();
                state.check_open()?;
                if state.matches_state(selector, wait_state) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::timeout(timeout));
            }
            tokio::time::sleep(MOCK_POLL).await;
        }
    }

    async fn wait_for_load_state(&self, state: LoadState, _timeout: Duration) -> DriverResult<()> {
        let mut guard = self.lock();
        guard.check_open()?;
        guard.history.push(format!("load_state:{state}"));
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        let state = self.lock();
        state.check_open()?;
        Ok(state.url.clone())
    }

    async fn close(&self) -> DriverResult<()> {
        {
            let mut state = self.lock();
            state.closed = true;
            state.close_count += 1;
            state.history.push("close".to_string());
        }
        if let Some(counter) = &self.release_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

type DriverBuilder = dyn Fn(usize) -> MockDriver + Send + Sync;

/// Session factory handing out mock drivers
pub struct MockSessionFactory {
    build: Box<DriverBuilder>,
    acquired: AtomicUsize,
    released: Arc<AtomicUsize>,
    fail_acquire: bool,
    drivers: Mutex<Vec<MockDriver>>,
}

impl std::fmt::Debug for MockSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSessionFactory")
            .field("acquired", &self.acquired())
            .field("released", &self.released())
            .field("fail_acquire", &self.fail_acquire)
            .finish_non_exhaustive()
    }
}

impl MockSessionFactory {
    /// Build each session's driver with `build(session_index)`
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(usize) -> MockDriver + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
            acquired: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            fail_acquire: false,
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// Every acquisition fails (browser cannot launch)
    #[must_use]
    pub fn failing() -> Self {
        let mut factory = Self::new(|_| MockDriver::new());
        factory.fail_acquire = true;
        factory
    }

    /// Sessions acquired so far
    #[must_use]
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Sessions released so far
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Handles to every driver handed out, in acquisition order
    #[must_use]
    pub fn drivers(&self) -> Vec<MockDriver> {
        self.drivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn acquire(&self) -> HarnessResult<Session> {
        if self.fail_acquire {
            return Err(crate::result::HarnessError::BrowserLaunchError {
                message: "mock factory configured to fail".to_string(),
            });
        }
        let index = self.acquired.fetch_add(1, Ordering::SeqCst);
        let driver = (self.build)(index).with_release_counter(Arc::clone(&self.released));
        self.drivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(driver.clone());
        Ok(Session::new(Box::new(driver)))
    }
}
