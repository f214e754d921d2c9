use std::fmt;

use serde::{Deserialize, Serialize};

/// How a UI element is resolved on the page.
///
/// In configuration files a locator is written as a single-key table, e.g.
/// `title_field = { id = "title" }` or `publish_button = { text = "Publish" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Id(String),
    Css(String),
    /// Visible text of a clickable node; exact match wins over substring match.
    Text(String),
    #[serde(rename = "xpath")]
    XPath(String),
}

impl Locator {
    pub fn id(value: impl Into<String>) -> Self {
        Locator::Id(value.into())
    }

    pub fn css(value: impl Into<String>) -> Self {
        Locator::Css(value.into())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Locator::Text(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Locator::XPath(value.into())
    }

    /// CSS selector equivalent, when one exists without evaluating script.
    pub fn as_css(&self) -> Option<String> {
        match self {
            Locator::Id(id) => Some(format!("#{}", escape_css_ident(id))),
            Locator::Css(selector) => Some(selector.clone()),
            Locator::Text(_) | Locator::XPath(_) => None,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "id={id}"),
            Locator::Css(selector) => write!(f, "css={selector}"),
            Locator::Text(text) => write!(f, "text={text}"),
            Locator::XPath(path) => write!(f, "xpath={path}"),
        }
    }
}

fn escape_css_ident(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for (idx, ch) in value.chars().enumerate() {
        if idx == 0 && ch.is_ascii_digit() {
            escaped.push_str(&format!("\\{:x} ", ch as u32));
        } else if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            escaped.push(ch);
        } else {
            escaped.push('\\');
            escaped.push(ch);
        }
    }
    escaped
}

/// Keys the workflow may press on a focused element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Escape,
}

impl Key {
    pub fn as_str(self) -> &'static str {
        match self {
            Key::Enter => "Enter",
            Key::Tab => "Tab",
            Key::Escape => "Escape",
        }
    }
}

/// Opaque reference to an element resolved by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(u64);

impl ElementRef {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Controls {
        title: Locator,
        publish: Locator,
        tag: Locator,
    }

    #[test]
    fn locators_parse_from_single_key_tables() {
        let parsed: Controls = toml::from_str(
            r#"
            title = { id = "video-title" }
            publish = { text = "Publish" }
            tag = { xpath = "//input[@name='tags']" }
            "#,
        )
        .unwrap();
        assert_eq!(parsed.title, Locator::id("video-title"));
        assert_eq!(parsed.publish, Locator::text("Publish"));
        assert_eq!(parsed.tag, Locator::xpath("//input[@name='tags']"));
    }

    #[test]
    fn ids_are_escaped_for_css() {
        assert_eq!(Locator::id("title").as_css().unwrap(), "#title");
        assert_eq!(Locator::id("1st").as_css().unwrap(), "#\\31 st");
        assert_eq!(Locator::id("a.b").as_css().unwrap(), "#a\\.b");
        assert!(Locator::text("Publish").as_css().is_none());
    }
}
