//! Chromium driver over the Chrome DevTools Protocol.
//!
//! Only compiled with the `browser` feature. Elements found by a lookup are
//! tagged in the page with a per-document handle attribute, so later calls
//! address exactly the node the resolver picked.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::dom::{BackendNodeId, SetFileInputFilesParams};
use chromiumoxide::cdp::browser_protocol::page::{
    EventFileChooserOpened, SetInterceptFileChooserDialogParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::BrowserSettings;
use crate::driver::{
    BrowserDriver, DriverError, DriverResult, ElementHandle, ElementState, ElementWaitState,
    FileChooserTicket, LoadState,
};
use crate::result::{HarnessError, HarnessResult};
use crate::selector::Selector;
use crate::session::{Session, SessionFactory};

const HANDLE_ATTR: &str = "data-g40-handle";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Network counts as idle once no new resource entries appear for this long
const NETWORK_QUIET: Duration = Duration::from_millis(500);

// ============================================================================
// Page scripts
// ============================================================================

fn tag_script(selector: &Selector) -> String {
    format!(
        "(() => {{ \
           window.__g40Doc = window.__g40Doc || Math.random().toString(36).slice(2); \
           window.__g40Seq = window.__g40Seq || 0; \
           return ({query}).filter(n => n instanceof Element).map(n => {{ \
             if (!n.hasAttribute('{HANDLE_ATTR}')) {{ \
               window.__g40Seq += 1; \
               n.setAttribute('{HANDLE_ATTR}', window.__g40Doc + '-' + window.__g40Seq); \
             }} \
             return {{ id: n.getAttribute('{HANDLE_ATTR}'), tag_name: n.tagName.toLowerCase() }}; \
           }}); \
         }})()",
        query = selector.to_query_all()
    )
}

fn handle_css(element: &ElementHandle) -> String {
    format!("[{HANDLE_ATTR}=\"{}\"]", element.id.replace('"', "\\\""))
}

fn lookup(element: &ElementHandle) -> String {
    format!(
        "document.querySelector({})",
        serde_json::Value::String(handle_css(element))
    )
}

fn state_script(element: &ElementHandle) -> String {
    format!(
        "(() => {{ \
           const el = {lookup}; \
           if (!el || !el.isConnected) return {{ attached: false, visible: false, enabled: false }}; \
           const style = getComputedStyle(el); \
           const rect = el.getBoundingClientRect(); \
           const visible = style.visibility !== 'hidden' && style.display !== 'none' \
             && parseFloat(style.opacity || '1') > 0 && rect.width > 0 && rect.height > 0; \
           const enabled = !el.disabled && el.getAttribute('aria-disabled') !== 'true'; \
           return {{ attached: true, visible, enabled }}; \
         }})()",
        lookup = lookup(element)
    )
}

fn text_script(element: &ElementHandle) -> String {
    format!(
        "(() => {{ const el = {}; return {{ text: el ? (el.innerText ?? el.textContent ?? '') : null }}; }})()",
        lookup(element)
    )
}

const LOAD_SCRIPT: &str = "({ ready: document.readyState, \
     resources: performance.getEntriesByType('resource').length })";

#[derive(Debug, Deserialize)]
struct TextReading {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoadReading {
    ready: String,
    resources: usize,
}

/// Decode a script's return value
fn decode<T: DeserializeOwned>(value: Option<serde_json::Value>) -> DriverResult<T> {
    let value = value.ok_or_else(|| DriverError::protocol("script returned no value"))?;
    serde_json::from_value(value).map_err(|e| DriverError::protocol(e.to_string()))
}

fn cdp_error(error: CdpError) -> DriverError {
    DriverError::protocol(error.to_string())
}

enum Chooser {
    Armed(EventStream<EventFileChooserOpened>),
    Opened(BackendNodeId),
}

// ============================================================================
// Driver
// ============================================================================

/// Browser driver backed by a headless (or headed) Chromium
pub struct ChromiumDriver {
    browser: Mutex<CdpBrowser>,
    page: CdpPage,
    handler: JoinHandle<()>,
    choosers: Mutex<HashMap<u64, Chooser>>,
    next_ticket: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for ChromiumDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumDriver")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ChromiumDriver {
    /// Launch a browser with one blank page
    ///
    /// # Errors
    ///
    /// Returns error if the executable is missing or the browser cannot start
    pub async fn launch(settings: &BrowserSettings) -> HarnessResult<Self> {
        let mut builder = CdpConfig::builder().window_size(settings.viewport_width, settings.viewport_height);

        if !settings.headless {
            builder = builder.with_head();
        }

        if !settings.sandbox {
            builder = builder.no_sandbox();
        }

        if let Some(ref path) = settings.chromium_path {
            if !Path::new(path).exists() {
                return Err(HarnessError::BrowserNotFound);
            }
            builder = builder.chrome_executable(path);
        }

        for arg in &settings.args {
            builder = builder.arg(arg.clone());
        }

        let cdp_config = builder
            .build()
            .map_err(|message| HarnessError::BrowserLaunchError { message })?;

        let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(|e| {
            HarnessError::BrowserLaunchError {
                message: e.to_string(),
            }
        })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    debug!(%error, "browser handler error");
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(|e| {
            HarnessError::session(format!("failed to open page: {e}"))
        })?;

        info!(
            headless = settings.headless,
            width = settings.viewport_width,
            height = settings.viewport_height,
            "chromium launched"
        );

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler,
            choosers: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> DriverResult<T> {
        self.check_open()?;
        let result = self.page.evaluate(script).await.map_err(cdp_error)?;
        decode(result.value().cloned())
    }

    async fn element(&self, element: &ElementHandle) -> DriverResult<chromiumoxide::element::Element> {
        self.check_open()?;
        self.page
            .find_element(handle_css(element))
            .await
            .map_err(|_| DriverError::Detached)
    }

    /// Stop intercepting choosers once no ticket is outstanding
    async fn disarm_if_idle(&self) -> DriverResult<()> {
        if !self.choosers.lock().await.is_empty() || self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.page
            .execute(SetInterceptFileChooserDialogParams::new(false))
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn load_reached(&self, state: LoadState, quiet: &mut Option<(usize, Instant)>) -> DriverResult<bool> {
        let page: LoadReading = self.eval(LOAD_SCRIPT.to_string()).await?;
        Ok(match state {
            LoadState::DomContentLoaded => page.ready != "loading",
            LoadState::Load => page.ready == "complete",
            LoadState::NetworkIdle => {
                if page.ready != "complete" {
                    *quiet = None;
                    return Ok(false);
                }
                match quiet {
                    Some((count, since)) if *count == page.resources => since.elapsed() >= NETWORK_QUIET,
                    _ => {
                        *quiet = Some((page.resources, Instant::now()));
                        false
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&self, url: &str, wait_until: LoadState, limit: Duration) -> DriverResult<()> {
        self.check_open()?;
        let started = Instant::now();
        match timeout(limit, self.page.goto(url)).await {
            Err(_) => return Err(DriverError::timeout(limit)),
            Ok(Err(e)) => {
                return Err(DriverError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Ok(_)) => {}
        }
        let remaining = limit.saturating_sub(started.elapsed());
        self.wait_for_load_state(wait_until, remaining).await
    }

    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<ElementHandle>> {
        self.eval(tag_script(selector)).await
    }

    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState> {
        self.eval(state_script(element)).await
    }

    async fn text_content(&self, element: &ElementHandle) -> DriverResult<String> {
        let reading: TextReading = self.eval(text_script(element)).await?;
        reading.text.ok_or(DriverError::Detached)
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> DriverResult<()> {
        let node = self.element(element).await?;
        node.call_js_fn(
            "function() { this.focus(); if (typeof this.select === 'function') { this.select(); } }",
            false,
        )
        .await
        .map_err(cdp_error)?;
        if text.is_empty() {
            node.press_key("Backspace").await.map_err(cdp_error)?;
        } else {
            node.type_str(text).await.map_err(cdp_error)?;
        }
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        let node = self.element(element).await?;
        node.click().await.map_err(cdp_error)?;
        Ok(())
    }

    async fn intercept_file_chooser(&self) -> DriverResult<FileChooserTicket> {
        self.check_open()?;
        let events = self
            .page
            .event_listener::<EventFileChooserOpened>()
            .await
            .map_err(cdp_error)?;
        self.page
            .execute(SetInterceptFileChooserDialogParams::new(true))
            .await
            .map_err(cdp_error)?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        self.choosers.lock().await.insert(ticket, Chooser::Armed(events));
        debug!(ticket, "file chooser interception armed");
        Ok(FileChooserTicket(ticket))
    }

    async fn await_file_chooser(&self, ticket: FileChooserTicket, limit: Duration) -> DriverResult<()> {
        self.check_open()?;
        let armed = self.choosers.lock().await.remove(&ticket.0);
        let mut events = match armed {
            Some(Chooser::Armed(events)) => events,
            Some(opened @ Chooser::Opened(_)) => {
                self.choosers.lock().await.insert(ticket.0, opened);
                return Ok(());
            }
            None => return Err(DriverError::protocol("unknown file chooser ticket")),
        };
        let event = match timeout(limit, events.next()).await {
            Err(_) => return Err(DriverError::timeout(limit)),
            Ok(None) => return Err(DriverError::Closed),
            Ok(Some(event)) => event,
        };
        let node = event
            .backend_node_id
            .clone()
            .ok_or_else(|| DriverError::protocol("file chooser was not opened by a file input"))?;
        self.choosers.lock().await.insert(ticket.0, Chooser::Opened(node));
        Ok(())
    }

    async fn set_chooser_files(&self, ticket: FileChooserTicket, path: &Path) -> DriverResult<()> {
        self.check_open()?;
        let node = match self.choosers.lock().await.remove(&ticket.0) {
            Some(Chooser::Opened(node)) => node,
            _ => return Err(DriverError::protocol("no file chooser is open for this ticket")),
        };
        let params = SetFileInputFilesParams::builder()
            .files(vec![path.display().to_string()])
            .backend_node_id(node)
            .build()
            .map_err(DriverError::protocol)?;
        self.page.execute(params).await.map_err(cdp_error)?;
        if let Err(error) = self.disarm_if_idle().await {
            warn!(%error, "failed to disarm file chooser interception");
        }
        Ok(())
    }

    async fn cancel_file_chooser(&self, ticket: FileChooserTicket) -> DriverResult<()> {
        if self.choosers.lock().await.remove(&ticket.0).is_some() {
            debug!(ticket = ticket.0, "file chooser interception cancelled");
        }
        self.disarm_if_idle().await
    }

    async fn wait_for_selector(
        &self,
        selector: &Selector,
        wait_state: ElementWaitState,
        limit: Duration,
    ) -> DriverResult<()> {
        let deadline = Instant::now() + limit;
        loop {
            let mut any_attached = false;
            let mut any_visible = false;
            for handle in self.find_elements(selector).await? {
                let state = self.element_state(&handle).await?;
                any_attached |= state.attached;
                any_visible |= state.attached && state.visible;
            }
            let reached = match wait_state {
                ElementWaitState::Attached => any_attached,
                ElementWaitState::Visible => any_visible,
                ElementWaitState::Hidden => !any_visible,
            };
            if reached {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::timeout(limit));
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn wait_for_load_state(&self, state: LoadState, limit: Duration) -> DriverResult<()> {
        let deadline = Instant::now() + limit;
        let mut quiet = None;
        loop {
            if self.load_reached(state, &mut quiet).await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::timeout(limit));
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.check_open()?;
        Ok(self.page.url().await.map_err(cdp_error)?.unwrap_or_default())
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.browser.lock().await.close().await;
        self.handler.abort();
        result.map(|_| ()).map_err(cdp_error)
    }
}

// ============================================================================
// Session factory
// ============================================================================

/// Launches one Chromium per session
#[derive(Debug, Clone, Default)]
pub struct ChromiumSessionFactory {
    settings: BrowserSettings,
}

impl ChromiumSessionFactory {
    /// Create a factory with the given browser settings
    #[must_use]
    pub const fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    /// Browser settings used for every launch
    #[must_use]
    pub const fn settings(&self) -> &BrowserSettings {
        &self.settings
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn acquire(&self) -> HarnessResult<Session> {
        let driver = ChromiumDriver::launch(&self.settings).await?;
        Ok(Session::new(Box::new(driver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_script_embeds_query() {
        let script = tag_script(&Selector::test_id("login-email"));
        assert!(script.contains("data-testid"));
        assert!(script.contains(HANDLE_ATTR));
    }

    #[test]
    fn test_handle_css_escapes_quotes() {
        let handle = ElementHandle::new("a\"b", "div");
        assert_eq!(handle_css(&handle), "[data-g40-handle=\"a\\\"b\"]");
    }

    #[test]
    fn test_state_script_targets_handle() {
        let script = state_script(&ElementHandle::new("abc-1", "button"));
        assert!(script.contains("abc-1"));
        assert!(script.contains("aria-disabled"));
    }

    mod decode_tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn test_detached_text_reading() {
            let script = text_script(&ElementHandle::new("abc-1", "div"));
            assert!(script.contains("abc-1"));
            let reading: TextReading = decode(Some(json!({ "text": null }))).unwrap();
            assert!(reading.text.is_none());
        }

        #[test]
        fn test_element_state_decodes() {
            let state: ElementState =
                decode(Some(json!({ "attached": true, "visible": true, "enabled": false }))).unwrap();
            assert!(state.attached && state.visible && !state.enabled);
        }

        #[test]
        fn test_unexpected_shape_is_protocol_error() {
            let error = decode::<LoadReading>(Some(json!({ "ready": 3 }))).unwrap_err();
            assert!(matches!(error, DriverError::Protocol { .. }));
        }

        #[test]
        fn test_missing_value_is_protocol_error() {
            let error = decode::<Vec<ElementHandle>>(None).unwrap_err();
            assert!(error.to_string().contains("no value"));
        }
    }

    #[test]
    fn test_factory_keeps_settings() {
        let factory = ChromiumSessionFactory::new(BrowserSettings::default().with_no_sandbox());
        assert!(!factory.settings().sandbox);
    }
}
