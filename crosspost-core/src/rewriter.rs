use regex::{Captures, Regex};
use url::Url;

use crate::config::RewriterSection;

/// Routes `<img>` sources hosted on filtered domains through an image proxy.
///
/// Only the `src` value of matching tags changes (plus an `alt` when the tag has
/// none); every other byte of the document is left alone. Output is stable under
/// repeated application because the proxy host itself is never rewritten.
#[derive(Debug, Clone)]
pub struct ImageRewriter {
    proxy_host: String,
    default_alt: String,
    img_regex: Regex,
    src_regex: Regex,
    alt_regex: Regex,
}

impl Default for ImageRewriter {
    fn default() -> Self {
        let defaults = RewriterSection::default();
        Self::new(defaults.proxy_host, defaults.default_alt)
    }
}

impl ImageRewriter {
    pub fn new(proxy_host: impl Into<String>, default_alt: impl Into<String>) -> Self {
        Self {
            proxy_host: proxy_host.into(),
            default_alt: default_alt.into(),
            // Quoted attribute values may contain `>`.
            img_regex: Regex::new(r#"(?is)<img\b(?:"[^"]*"|'[^']*'|[^'">])*>"#)
                .expect("valid regex"),
            src_regex: Regex::new(r#"(?is)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
                .expect("valid regex"),
            alt_regex: Regex::new(r"(?is)\salt\s*=").expect("valid regex"),
        }
    }

    pub fn from_config(config: &RewriterSection) -> Self {
        Self::new(config.proxy_host.clone(), config.default_alt.clone())
    }

    pub fn proxy_host(&self) -> &str {
        &self.proxy_host
    }

    pub fn rewrite<S: AsRef<str>>(&self, html: &str, filtered_domains: &[S]) -> String {
        if filtered_domains.is_empty() {
            return html.to_string();
        }
        self.img_regex
            .replace_all(html, |caps: &Captures| {
                let tag = &caps[0];
                self.rewrite_tag(tag, filtered_domains)
                    .unwrap_or_else(|| tag.to_string())
            })
            .into_owned()
    }

    fn rewrite_tag<S: AsRef<str>>(&self, tag: &str, filtered_domains: &[S]) -> Option<String> {
        let src = self.src_regex.captures(tag)?;
        let value = src
            .get(1)
            .or_else(|| src.get(2))
            .or_else(|| src.get(3))?
            .as_str();
        if !self.is_filtered(value, filtered_domains) {
            return None;
        }

        let attribute = src.get(0)?;
        let leading = tag[attribute.start()..].chars().next().unwrap_or(' ');
        let proxied = format!(
            "{leading}src=\"https://{}/?url={}\"",
            self.proxy_host,
            escape_attribute(value)
        );
        let mut rewritten = String::with_capacity(tag.len() + proxied.len());
        rewritten.push_str(&tag[..attribute.start()]);
        rewritten.push_str(&proxied);
        rewritten.push_str(&tag[attribute.end()..]);

        if !self.alt_regex.is_match(&rewritten) {
            rewritten = insert_alt(&rewritten, &escape_attribute(&self.default_alt));
        }
        Some(rewritten)
    }

    fn is_filtered<S: AsRef<str>>(&self, src: &str, filtered_domains: &[S]) -> bool {
        let Ok(url) = Url::parse(src.trim()) else {
            return false;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        if host.eq_ignore_ascii_case(&self.proxy_host) {
            return false;
        }
        let host = host.to_ascii_lowercase();
        filtered_domains.iter().any(|domain| {
            let domain = domain.as_ref().trim();
            !domain.is_empty() && host.contains(&domain.to_ascii_lowercase())
        })
    }
}

/// Rewrites with the default proxy host and alt text.
pub fn rewrite<S: AsRef<str>>(html: &str, filtered_domains: &[S]) -> String {
    ImageRewriter::default().rewrite(html, filtered_domains)
}

fn insert_alt(tag: &str, alt: &str) -> String {
    let (body, close) = match tag.strip_suffix("/>") {
        Some(body) => (body, "/>"),
        None => (tag.strip_suffix('>').unwrap_or(tag), ">"),
    };
    let trimmed = body.trim_end();
    let trailing = &body[trimmed.len()..];
    format!("{trimmed} alt=\"{alt}\"{trailing}{close}")
}

fn escape_attribute(value: &str) -> String {
    value.replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAINS: [&str; 2] = ["twimg.com", "fbcdn.net"];

    #[test]
    fn filtered_image_goes_through_proxy() {
        let html = r#"<img src="https://pbs.twimg.com/x.jpg">"#;
        assert_eq!(
            rewrite(html, &DOMAINS),
            r#"<img src="https://wsrv.nl/?url=https://pbs.twimg.com/x.jpg" alt="image">"#
        );
    }

    #[test]
    fn unfiltered_markup_is_untouched() {
        let html = "<p>Hi</p>\n<img src=\"https://example.com/x.jpg\">\n<IMG SRC='/local.png' />";
        assert_eq!(rewrite(html, &DOMAINS), html);
    }

    #[test]
    fn rewriting_twice_changes_nothing() {
        let html = concat!(
            "<div><img class=\"hero\" src='https://pbs.twimg.com/a.png' alt=\"hero\"/>",
            "<img src=https://scontent.fbcdn.net/b.jpg width=10>",
            "<img src=\"https://example.com/c.jpg\">",
            "<img title='x > y' alt=\"a > b\" src=\"https://pbs.twimg.com/d.jpg\"></div>"
        );
        let once = rewrite(html, &DOMAINS);
        let twice = rewrite(&once, &DOMAINS);
        assert_eq!(once, twice);
        assert!(once.contains(r#"src="https://wsrv.nl/?url=https://pbs.twimg.com/a.png" alt="hero"/>"#));
        assert!(once.contains(
            r#"<img src="https://wsrv.nl/?url=https://scontent.fbcdn.net/b.jpg" width=10 alt="image">"#
        ));
        assert!(once.contains(r#"<img src="https://example.com/c.jpg">"#));
        assert!(once.contains(
            r#"alt="a > b" src="https://wsrv.nl/?url=https://pbs.twimg.com/d.jpg"></div>"#
        ));
    }

    #[test]
    fn angle_bracket_inside_quoted_attribute_does_not_end_the_tag() {
        let html = r#"<img alt="a > b" src="https://pbs.twimg.com/x.jpg">"#;
        assert_eq!(
            rewrite(html, &DOMAINS),
            r#"<img alt="a > b" src="https://wsrv.nl/?url=https://pbs.twimg.com/x.jpg">"#
        );
        let html = r#"<img title='1 > 0' src='https://pbs.twimg.com/y.jpg'/>"#;
        assert_eq!(
            rewrite(html, &DOMAINS),
            r#"<img title='1 > 0' src="https://wsrv.nl/?url=https://pbs.twimg.com/y.jpg" alt="image"/>"#
        );
    }

    #[test]
    fn existing_alt_is_kept_and_self_closing_tags_stay_closed() {
        let html = r#"<img alt="cat" src="https://pbs.twimg.com/cat.jpg" />"#;
        assert_eq!(
            rewrite(html, &DOMAINS),
            r#"<img alt="cat" src="https://wsrv.nl/?url=https://pbs.twimg.com/cat.jpg" />"#
        );
        let html = r#"<img src="https://pbs.twimg.com/dog.jpg" />"#;
        assert_eq!(
            rewrite(html, &DOMAINS),
            r#"<img src="https://wsrv.nl/?url=https://pbs.twimg.com/dog.jpg" alt="image" />"#
        );
    }

    #[test]
    fn data_src_and_relative_urls_are_ignored() {
        let html = r#"<img data-src="https://pbs.twimg.com/lazy.jpg" src="/placeholder.gif">"#;
        assert_eq!(rewrite(html, &DOMAINS), html);
    }

    #[test]
    fn domain_must_match_host_not_path() {
        let html = r#"<img src="https://example.com/twimg.com/x.jpg">"#;
        assert_eq!(rewrite(html, &DOMAINS), html);
    }

    #[test]
    fn empty_domain_set_is_a_no_op() {
        let html = r#"<img src="https://pbs.twimg.com/x.jpg">"#;
        let none: [&str; 0] = [];
        assert_eq!(rewrite(html, &none), html);
    }

    #[test]
    fn custom_proxy_and_alt() {
        let rewriter = ImageRewriter::new("img.proxy.test", "picture");
        let html = r#"<img src="http://video.twimg.com/x.jpg">"#;
        assert_eq!(
            rewriter.rewrite(html, &DOMAINS),
            r#"<img src="https://img.proxy.test/?url=http://video.twimg.com/x.jpg" alt="picture">"#
        );
    }
}
