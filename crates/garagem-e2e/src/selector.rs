//! Selector strategies and ordered selector candidates.
//!
//! A [`SelectorCandidate`] lists several ways of addressing the same logical
//! element, most robust first. Scenario files use Playwright-style strings:
//!
//! ```text
//! testid=login-email            data-testid attribute
//! css=input[type="email"]       CSS selector (the default for bare strings)
//! xpath=//button[.="Entrar"]    XPath (bare strings starting with // too)
//! text=Placa reconhecida        smallest element containing the text
//! css=button >> text=Salvar     CSS filtered by text content
//! ```

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::result::{HarnessError, HarnessResult};

/// Selector type for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Selector {
    /// Test ID selector (data-testid attribute)
    TestId(String),
    /// CSS selector (e.g., "button.primary")
    Css(String),
    /// XPath selector
    XPath(String),
    /// Text content selector
    Text(String),
    /// Combined selector with text filter
    CssWithText {
        /// Base CSS selector
        css: String,
        /// Text content to match
        text: String,
    },
}

/// Strategy family of a selector, used in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    /// Dedicated test attribute
    Attribute,
    /// CSS selector
    Css,
    /// Text content
    Text,
    /// XPath / structural path
    Structural,
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Attribute => "attribute",
            Self::Css => "css",
            Self::Text => "text",
            Self::Structural => "structural",
        };
        f.write_str(name)
    }
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Create a text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create an XPath selector
    #[must_use]
    pub fn xpath(path: impl Into<String>) -> Self {
        Self::XPath(path.into())
    }

    /// Strategy family of this selector
    #[must_use]
    pub const fn strategy(&self) -> SelectorStrategy {
        match self {
            Self::TestId(_) => SelectorStrategy::Attribute,
            Self::Css(_) | Self::CssWithText { .. } => SelectorStrategy::Css,
            Self::Text(_) => SelectorStrategy::Text,
            Self::XPath(_) => SelectorStrategy::Structural,
        }
    }

    /// Absolute DOM paths break on any layout change
    #[must_use]
    pub fn is_positional(&self) -> bool {
        match self {
            Self::XPath(path) => {
                let path = path.trim_start_matches('(');
                path.starts_with("/html") || path.starts_with("html/")
            }
            _ => false,
        }
    }

    /// JavaScript expression evaluating to every match, in document order
    #[must_use]
    pub fn to_query_all(&self) -> String {
        match self {
            Self::Css(s) => format!("Array.from(document.querySelectorAll({}))", js_string(s)),
            Self::TestId(id) => {
                let css = format!("[data-testid={}]", js_string(id));
                format!("Array.from(document.querySelectorAll({}))", js_string(&css))
            }
            Self::XPath(path) => format!(
                "(() => {{ const r = document.evaluate({}, document, null, \
                 XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; \
                 for (let i = 0; i < r.snapshotLength; i++) {{ out.push(r.snapshotItem(i)); }} \
                 return out; }})()",
                js_string(path)
            ),
            Self::Text(t) => format!(
                "Array.from(document.querySelectorAll('body *')).filter(el => \
                 el.textContent.includes({t}) && \
                 !Array.from(el.children).some(c => c.textContent.includes({t})))",
                t = js_string(t)
            ),
            Self::CssWithText { css, text } => format!(
                "Array.from(document.querySelectorAll({})).filter(el => el.textContent.includes({}))",
                js_string(css),
                js_string(text)
            ),
        }
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

impl FromStr for Selector {
    type Err = HarnessError;

    fn from_str(raw: &str) -> HarnessResult<Self> {
        let s = raw.trim();
        let invalid = |message: &str| HarnessError::InvalidSelector {
            selector: raw.to_string(),
            message: message.to_string(),
        };

        if s.is_empty() {
            return Err(invalid("selector is empty"));
        }

        // Engine prefixes own the rest of the string, `>>` included.
        let (selector, value) = if let Some(v) = s.strip_prefix("xpath=") {
            (Self::XPath(v.trim().to_string()), v)
        } else if let Some(v) = s.strip_prefix("text=") {
            (Self::Text(strip_quotes(v).to_string()), strip_quotes(v))
        } else if let Some(v) = s
            .strip_prefix("testid=")
            .or_else(|| s.strip_prefix("data-testid="))
        {
            (Self::TestId(strip_quotes(v).to_string()), strip_quotes(v))
        } else if s.starts_with("//") || s.starts_with("(//") {
            (Self::XPath(s.to_string()), s)
        } else if let Some((left, right)) = s.split_once(">>") {
            let css = left.trim();
            let css = css.strip_prefix("css=").unwrap_or(css).trim();
            let text = right
                .trim()
                .strip_prefix("text=")
                .ok_or_else(|| invalid("only 'css >> text=' chains are supported"))?;
            let text = strip_quotes(text);
            if css.is_empty() || text.is_empty() {
                return Err(invalid("chained selector has an empty side"));
            }
            return Ok(Self::CssWithText {
                css: css.to_string(),
                text: text.to_string(),
            });
        } else if let Some(v) = s.strip_prefix("css=") {
            (Self::Css(v.trim().to_string()), v)
        } else {
            (Self::Css(s.to_string()), s)
        };

        if value.trim().is_empty() {
            return Err(invalid("selector body is empty"));
        }
        Ok(selector)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TestId(id) => write!(f, "testid={id}"),
            Self::Css(css) => write!(f, "css={css}"),
            Self::XPath(path) => write!(f, "xpath={path}"),
            Self::Text(text) => write!(f, "text={text}"),
            Self::CssWithText { css, text } => write!(f, "css={css} >> text={text}"),
        }
    }
}

impl TryFrom<String> for Selector {
    type Error = HarnessError;

    fn try_from(value: String) -> HarnessResult<Self> {
        value.parse()
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

/// Ordered selector strategies for one logical element, most robust first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "Vec<Selector>")]
pub struct SelectorCandidate {
    selectors: Vec<Selector>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateRepr {
    One(Selector),
    Many(Vec<Selector>),
}

impl SelectorCandidate {
    /// Build a candidate list; it must not be empty
    pub fn new(selectors: Vec<Selector>) -> HarnessResult<Self> {
        if selectors.is_empty() {
            return Err(HarnessError::InvalidSelector {
                selector: String::new(),
                message: "a selector candidate needs at least one strategy".to_string(),
            });
        }
        Ok(Self { selectors })
    }

    /// Candidate with a single strategy
    #[must_use]
    pub fn single(selector: Selector) -> Self {
        Self {
            selectors: vec![selector],
        }
    }

    /// Parse each string as a selector
    pub fn parse<I, S>(raw: I) -> HarnessResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selectors = raw
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<HarnessResult<Vec<Selector>>>()?;
        Self::new(selectors)
    }

    /// Strategies in preference order
    #[must_use]
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// Number of strategies
    #[must_use]
    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    /// Never true: a candidate holds at least one selector
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Most preferred strategy
    #[must_use]
    pub fn primary(&self) -> &Selector {
        &self.selectors[0]
    }

    /// Strategies addressing elements by absolute DOM path
    pub fn positional(&self) -> impl Iterator<Item = &Selector> {
        self.selectors.iter().filter(|s| s.is_positional())
    }

    /// Human-readable description for reports
    #[must_use]
    pub fn describe(&self) -> String {
        self.selectors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl<'de> Deserialize<'de> for SelectorCandidate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match CandidateRepr::deserialize(deserializer)? {
            CandidateRepr::One(selector) => Ok(Self::single(selector)),
            CandidateRepr::Many(selectors) => Self::new(selectors).map_err(de::Error::custom),
        }
    }
}

impl From<SelectorCandidate> for Vec<Selector> {
    fn from(candidate: SelectorCandidate) -> Self {
        candidate.selectors
    }
}

impl From<Selector> for SelectorCandidate {
    fn from(selector: Selector) -> Self {
        Self::single(selector)
    }
}

impl fmt::Display for SelectorCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
