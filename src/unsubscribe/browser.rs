//! Headless-browser unsubscribe attempts
//!
//! One attempt drives one isolated browser session: navigate to the target,
//! wait for the page to load, then walk an ordered list of [`Matcher`]s and
//! click the first element found. Form-submit controls are tried only after
//! every unsubscribe-specific matcher misses.
//!
//! The session is owned by the attempt and torn down when it is dropped, so
//! every return path (including errors) closes the browser.

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::WebAutomation;
use crate::config::UnsubscribeConfig;
use crate::error::{Result, TriageError};

/// Lower-cases the text of the context node for case-insensitive XPath matching
const LOWER_TEXT: &str =
    "translate(normalize-space(.), 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz')";
const LOWER_VALUE: &str =
    "translate(@value, 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz')";

/// How a matcher finds an element on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
}

/// A named element-finding strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pub name: String,
    pub locator: Locator,
}

impl Matcher {
    pub fn css(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: Locator::Css(selector.into()),
        }
    }

    pub fn xpath(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: Locator::XPath(query.into()),
        }
    }
}

/// Unsubscribe-specific matchers in priority order
pub fn default_matchers() -> Vec<Matcher> {
    vec![
        Matcher::xpath(
            "button text",
            format!("//button[contains({}, 'unsubscribe')]", LOWER_TEXT),
        ),
        Matcher::xpath(
            "input value",
            format!(
                "//input[(@type='submit' or @type='button') and contains({}, 'unsubscribe')]",
                LOWER_VALUE
            ),
        ),
        Matcher::xpath(
            "link text",
            format!("//a[contains({}, 'unsubscribe')]", LOWER_TEXT),
        ),
        Matcher::xpath(
            "role=button text",
            format!("//*[@role='button' and contains({}, 'unsubscribe')]", LOWER_TEXT),
        ),
        Matcher::xpath(
            "opt-out text",
            format!(
                "//*[self::button or self::a][contains({t}, 'opt out') or contains({t}, 'opt-out')]",
                t = LOWER_TEXT
            ),
        ),
        Matcher::css("unsubscribe id", "#unsubscribe, #unsubscribe-button, #unsubscribe_button"),
        Matcher::css("unsubscribe class", ".unsubscribe, .unsubscribe-button, .unsubscribe_button"),
        Matcher::css(
            "unsubscribe attribute",
            "button[class*='unsubscribe'], a[class*='unsubscribe'], button[id*='unsubscribe'], \
             button[name*='unsubscribe'], input[name*='unsubscribe']",
        ),
    ]
}

/// Generic submit controls, tried after every unsubscribe matcher misses
pub fn form_submit_fallbacks() -> Vec<Matcher> {
    vec![
        Matcher::css("form submit button", "form button[type='submit']"),
        Matcher::css("form submit input", "form input[type='submit']"),
        Matcher::css("submit button", "button[type='submit']"),
        Matcher::css("submit input", "input[type='submit']"),
    ]
}

/// One isolated browser page. Dropping it tears the session down.
pub trait PageSession {
    /// Load `url` and wait until the page has finished loading
    fn open(&mut self, url: &str) -> Result<()>;

    /// Click the first element matching `locator`. `Ok(false)` when nothing matches.
    fn click_first(&mut self, locator: &Locator) -> Result<bool>;

    /// Best-effort wait for a navigation triggered by a click
    fn wait_for_navigation(&mut self, timeout: Duration) -> Result<()>;
}

/// Creates fresh browser sessions
pub trait SessionLauncher: Send + Sync {
    fn launch(&self) -> Result<Box<dyn PageSession>>;
}

/// Run one attempt against an open session. Returns the name of the matcher
/// whose element was clicked.
pub fn run_attempt(
    session: &mut dyn PageSession,
    url: &str,
    matchers: &[Matcher],
    fallbacks: &[Matcher],
    post_click_wait: Duration,
) -> Result<String> {
    session.open(url)?;

    for matcher in matchers.iter().chain(fallbacks.iter()) {
        match session.click_first(&matcher.locator) {
            Ok(true) => {
                debug!(url, matcher = %matcher.name, "Clicked unsubscribe control");
                // Single-page flows never navigate
                if let Err(e) = session.wait_for_navigation(post_click_wait) {
                    debug!(url, "No navigation after click: {}", e);
                }
                return Ok(matcher.name.clone());
            }
            Ok(false) => continue,
            Err(e) => {
                debug!(url, matcher = %matcher.name, "Matcher failed: {}", e);
                continue;
            }
        }
    }

    Err(TriageError::Automation(
        "No unsubscribe control found on page".to_string(),
    ))
}

fn automation_error(context: &str, error: impl std::fmt::Display) -> TriageError {
    TriageError::Automation(format!("{}: {}", context, error))
}

/// Chrome session: the browser process plus its single tab
struct ChromeSession {
    // Field order matters: the tab is released before the browser process
    tab: Arc<Tab>,
    _browser: Browser,
    navigation_timeout: Duration,
}

impl PageSession for ChromeSession {
    fn open(&mut self, url: &str) -> Result<()> {
        self.tab.set_default_timeout(self.navigation_timeout);
        self.tab
            .navigate_to(url)
            .map_err(|e| automation_error("Navigation failed", e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| automation_error("Page did not load", e))?;
        Ok(())
    }

    fn click_first(&mut self, locator: &Locator) -> Result<bool> {
        let found = match locator {
            Locator::Css(selector) => self.tab.find_element(selector),
            Locator::XPath(query) => self.tab.find_element_by_xpath(query),
        };
        let element = match found {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        element
            .click()
            .map_err(|e| automation_error("Click failed", e))?;
        Ok(true)
    }

    fn wait_for_navigation(&mut self, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .wait_until_navigated()
            .map_err(|e| automation_error("Navigation wait", e))?;
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(true) {
            debug!("Tab close during teardown failed: {}", e);
        }
    }
}

/// Launches a new headless Chrome per session
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
    sandbox: bool,
    navigation_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(config: &UnsubscribeConfig) -> Self {
        let chrome_path = config.chrome_path.clone().or_else(|| {
            std::env::var("CHROME_PATH").ok().map(PathBuf::from)
        });
        Self {
            chrome_path,
            sandbox: config.sandbox,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        }
    }
}

impl SessionLauncher for ChromeLauncher {
    fn launch(&self) -> Result<Box<dyn PageSession>> {
        let mut builder = LaunchOptionsBuilder::default();
        builder.headless(true);
        builder.sandbox(self.sandbox);
        builder.idle_browser_timeout(self.navigation_timeout * 4);
        if let Some(path) = &self.chrome_path {
            builder.path(Some(path.clone()));
        }
        let options = builder
            .build()
            .map_err(|e| automation_error("Invalid browser options", e))?;

        let browser = Browser::new(options).map_err(|e| automation_error("Browser launch failed", e))?;
        let tab = browser
            .new_tab()
            .map_err(|e| automation_error("Could not open tab", e))?;

        Ok(Box::new(ChromeSession {
            tab,
            _browser: browser,
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

/// [`WebAutomation`] that runs each attempt in its own browser session on a
/// blocking thread
pub struct BrowserAutomation {
    launcher: Arc<dyn SessionLauncher>,
    matchers: Arc<Vec<Matcher>>,
    fallbacks: Arc<Vec<Matcher>>,
    post_click_wait: Duration,
}

impl BrowserAutomation {
    pub fn new(launcher: Arc<dyn SessionLauncher>, post_click_wait: Duration) -> Self {
        Self {
            launcher,
            matchers: Arc::new(default_matchers()),
            fallbacks: Arc::new(form_submit_fallbacks()),
            post_click_wait,
        }
    }

    pub fn chrome(config: &UnsubscribeConfig) -> Self {
        Self::new(
            Arc::new(ChromeLauncher::new(config)),
            Duration::from_secs(config.post_click_wait_secs),
        )
    }

    /// Replace the unsubscribe matchers; fallbacks stay in place
    pub fn with_matchers(mut self, matchers: Vec<Matcher>) -> Self {
        self.matchers = Arc::new(matchers);
        self
    }
}

#[async_trait]
impl WebAutomation for BrowserAutomation {
    async fn unsubscribe_via_web(&self, url: &str) -> Result<String> {
        let launcher = self.launcher.clone();
        let matchers = self.matchers.clone();
        let fallbacks = self.fallbacks.clone();
        let post_click_wait = self.post_click_wait;
        let url = url.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut session = launcher.launch()?;
            run_attempt(
                session.as_mut(),
                &url,
                &matchers,
                &fallbacks,
                post_click_wait,
            )
        })
        .await
        .map_err(|e| automation_error("Browser task aborted", e))?;

        match &outcome {
            Ok(matcher) => info!(matcher = %matcher, "Web unsubscribe clicked"),
            Err(e) => warn!("Web unsubscribe failed: {}", e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted page: `present` lists locators that exist on the page
    struct FakeSession {
        present: Vec<Locator>,
        fail_open: bool,
        clicks: Arc<Mutex<Vec<Locator>>>,
        drops: Arc<AtomicUsize>,
    }

    impl PageSession for FakeSession {
        fn open(&mut self, _url: &str) -> Result<()> {
            if self.fail_open {
                return Err(TriageError::Automation("timeout".to_string()));
            }
            Ok(())
        }

        fn click_first(&mut self, locator: &Locator) -> Result<bool> {
            if self.present.contains(locator) {
                self.clicks.lock().unwrap().push(locator.clone());
                return Ok(true);
            }
            Ok(false)
        }

        fn wait_for_navigation(&mut self, _timeout: Duration) -> Result<()> {
            Err(TriageError::Automation("no navigation".to_string()))
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeLauncher {
        present: Vec<Locator>,
        fail_open: bool,
        clicks: Arc<Mutex<Vec<Locator>>>,
        drops: Arc<AtomicUsize>,
    }

    impl FakeLauncher {
        fn new(present: Vec<Locator>, fail_open: bool) -> Self {
            Self {
                present,
                fail_open,
                clicks: Arc::new(Mutex::new(Vec::new())),
                drops: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SessionLauncher for FakeLauncher {
        fn launch(&self) -> Result<Box<dyn PageSession>> {
            Ok(Box::new(FakeSession {
                present: self.present.clone(),
                fail_open: self.fail_open,
                clicks: self.clicks.clone(),
                drops: self.drops.clone(),
            }))
        }
    }

    fn automation(launcher: Arc<FakeLauncher>) -> BrowserAutomation {
        BrowserAutomation::new(launcher, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_first_matcher_in_priority_order_wins() {
        let matchers = default_matchers();
        // Both the link and the button exist; the button comes first
        let present = vec![matchers[2].locator.clone(), matchers[0].locator.clone()];
        let launcher = Arc::new(FakeLauncher::new(present, false));

        let clicked = automation(launcher.clone())
            .unsubscribe_via_web("https://x.test/unsub")
            .await
            .unwrap();

        assert_eq!(clicked, "button text");
        assert_eq!(launcher.clicks.lock().unwrap().len(), 1);
        assert_eq!(launcher.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_form_submit_fallback() {
        let present = vec![Locator::Css("input[type='submit']".to_string())];
        let launcher = Arc::new(FakeLauncher::new(present, false));

        let clicked = automation(launcher.clone())
            .unsubscribe_via_web("https://x.test/unsub")
            .await
            .unwrap();
        assert_eq!(clicked, "submit input");
    }

    #[tokio::test]
    async fn test_nothing_found_fails_and_tears_down() {
        let launcher = Arc::new(FakeLauncher::new(Vec::new(), false));

        let result = automation(launcher.clone())
            .unsubscribe_via_web("https://x.test/unsub")
            .await;

        assert!(matches!(result, Err(TriageError::Automation(_))));
        assert_eq!(launcher.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_navigation_error_still_tears_down() {
        let launcher = Arc::new(FakeLauncher::new(Vec::new(), true));

        let result = automation(launcher.clone())
            .unsubscribe_via_web("https://x.test/unsub")
            .await;

        assert!(result.is_err());
        assert!(launcher.clicks.lock().unwrap().is_empty());
        assert_eq!(launcher.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_matchers_are_pluggable() {
        let custom = Matcher::css("preferences", "#email-preferences-off");
        let launcher = Arc::new(FakeLauncher::new(vec![custom.locator.clone()], false));

        let clicked = automation(launcher)
            .with_matchers(vec![custom])
            .unsubscribe_via_web("https://x.test/unsub")
            .await
            .unwrap();
        assert_eq!(clicked, "preferences");
    }
}
