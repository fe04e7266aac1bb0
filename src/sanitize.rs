//! Allow-list sanitization of untrusted message bodies.
//!
//! Output of this module is the only HTML that ever reaches a rendering
//! surface. Scripts, event handlers and non allow-listed URL schemes are
//! removed. Large inline attachments arrive from the server as
//! `inline-image-container` skeletons carrying `data-image-url`; those are
//! tagged for progressive loading. Links whose text disguises their target
//! are marked.

use html_escape::{decode_html_entities, encode_double_quoted_attribute, encode_text};
use regex::{Captures, Regex};
use scraper::Html;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::links::assess_link;

pub const ALLOWED_URL_SCHEMES: &[&str] = &["http", "https", "mailto", "tel", "cid", "data"];

pub const HIDDEN_URL_CLASS: &str = "tm-hidden-url";
pub const INLINE_IMAGE_CLASS: &str = "tm-inline-image";
/// Class of the skeleton the server emits in place of a large inline image.
pub const LAZY_IMAGE_CONTAINER_CLASS: &str = "inline-image-container";

/// Remote image awaiting progressive loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    /// Placeholder id inside the document (`img-0`, `img-1`, ...).
    pub id: String,
    /// Server path (`/api/messages/{id}/inline/{att}/`) or absolute URL.
    pub url: String,
}

/// Sanitized body plus what the renderer still has to do with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedHtml {
    pub html: String,
    pub inline_images: Vec<InlineImage>,
    pub hidden_links: usize,
}

fn cleaner() -> ammonia::Builder<'static> {
    let mut builder = ammonia::Builder::default();
    builder
        .add_tags(["font", "center", "u", "s"])
        .add_generic_attributes(["style", "class", "align", "dir"])
        .add_tag_attributes("table", ["width", "border", "cellpadding", "cellspacing", "bgcolor"])
        .add_tag_attributes("td", ["width", "colspan", "rowspan", "valign", "bgcolor"])
        .add_tag_attributes("th", ["width", "colspan", "rowspan", "valign", "bgcolor"])
        .add_tag_attributes("tr", ["valign", "bgcolor"])
        .add_tag_attributes("font", ["color", "face", "size"])
        .add_tag_attributes("div", ["data-image-url", "data-filename"])
        .url_schemes(ALLOWED_URL_SCHEMES.iter().copied().collect::<HashSet<_>>())
        .link_rel(Some("noopener noreferrer"))
        .strip_comments(true);
    builder
}

fn div_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<div\b([^>]*)>").expect("static regex"))
}

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<a\b([^>]*)>(.*?)</a>").expect("static regex"))
}

fn attr_re(name: &str) -> Regex {
    Regex::new(&format!(r#"\b{}="([^"]*)""#, regex::escape(name))).expect("escaped attribute name")
}

fn attr_value(attrs: &str, re: &Regex) -> Option<String> {
    re.captures(attrs)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_html_entities(m.as_str()).into_owned())
}

/// Visible text of an HTML fragment.
pub fn fragment_text(fragment: &str) -> String {
    Html::parse_fragment(fragment)
        .root_element()
        .text()
        .collect::<String>()
}

/// Sanitize an HTML body for display inside the message frame.
pub fn sanitize_html(html: &str) -> SanitizedHtml {
    if html.trim().is_empty() {
        return SanitizedHtml::default();
    }
    let clean = cleaner().clean(html).to_string();
    let (clean, inline_images) = tag_lazy_images(&clean);
    let (clean, hidden_links) = mark_hidden_links(&clean);
    SanitizedHtml {
        html: clean,
        inline_images,
        hidden_links,
    }
}

/// Same-origin path or http(s) URL; anything else is not fetched.
fn lazy_image_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    let lower = url.to_ascii_lowercase();
    let ok = (url.starts_with('/') && !url.starts_with("//"))
        || lower.starts_with("http://")
        || lower.starts_with("https://");
    ok.then(|| url.to_string())
}

fn tag_lazy_images(html: &str) -> (String, Vec<InlineImage>) {
    let class_re = attr_re("class");
    let url_re = attr_re("data-image-url");
    let name_re = attr_re("data-filename");
    let mut images = Vec::new();
    let out = div_re().replace_all(html, |caps: &Captures| {
        let attrs = &caps[1];
        let is_container = attr_value(attrs, &class_re)
            .is_some_and(|class| class.split_whitespace().any(|c| c == LAZY_IMAGE_CONTAINER_CLASS));
        let url = attr_value(attrs, &url_re).and_then(|raw| lazy_image_url(&raw));
        let (true, Some(url)) = (is_container, url) else {
            return caps[0].to_string();
        };
        let id = format!("img-{}", images.len());
        let name = attr_value(attrs, &name_re).unwrap_or_default();
        let attrs = attrs.replacen(" class=\"", &format!(" class=\"{INLINE_IMAGE_CLASS} is-loading "), 1);
        images.push(InlineImage { id: id.clone(), url });
        format!(
            r#"<div{attrs} data-image-id="{id}" role="img" aria-label="{}">"#,
            encode_double_quoted_attribute(&name),
        )
    });
    (out.into_owned(), images)
}

fn mark_hidden_links(html: &str) -> (String, usize) {
    let href_re = attr_re("href");
    let mut hidden = 0;
    let out = anchor_re().replace_all(html, |caps: &Captures| {
        let attrs = &caps[1];
        let inner = &caps[2];
        let Some(href) = attr_value(attrs, &href_re) else {
            return caps[0].to_string();
        };
        let assessment = assess_link(&fragment_text(inner), &href);
        if !assessment.hidden {
            return caps[0].to_string();
        }
        hidden += 1;
        let attrs = if attrs.contains(" class=\"") {
            attrs.replacen(" class=\"", &format!(" class=\"{HIDDEN_URL_CLASS} "), 1)
        } else {
            format!(r#"{attrs} class="{HIDDEN_URL_CLASS}""#)
        };
        let target = assessment.target_host.unwrap_or_default();
        format!(
            r#"<a{attrs} data-hidden-url="true">{inner}</a><span class="tm-hidden-url-badge" title="Leads to {}">&#9888;</span>"#,
            encode_double_quoted_attribute(&target),
        )
    });
    (out.into_owned(), hidden)
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("static regex"))
}

/// Escape a plain-text body, turn bare URLs into links, keep line breaks,
/// and sanitize the result.
pub fn render_plain_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut linked = String::with_capacity(text.len());
    let mut last = 0;
    for m in url_re().find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
        linked.push_str(&encode_text(&text[last..m.start()]));
        linked.push_str(&format!(
            r#"<a href="{}">{}</a>"#,
            encode_double_quoted_attribute(url),
            encode_text(url),
        ));
        last = m.start() + url.len();
    }
    linked.push_str(&encode_text(&text[last..]));
    let with_breaks = linked.replace("\r\n", "\n").replace('\n', "<br>\n");
    let clean = cleaner().clean(&with_breaks).to_string();
    mark_hidden_links(&clean).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_handlers() {
        let out = sanitize_html(
            r#"<script>alert(1)</script><img src=x onerror=alert(2)><p>Hello</p>"#,
        );
        assert!(!out.html.contains("<script"));
        assert!(!out.html.contains("alert"));
        assert!(!out.html.contains("onerror"));
        assert!(out.html.contains("<p>Hello</p>"));
    }

    #[test]
    fn keeps_benign_structure() {
        let out = sanitize_html(
            r#"<table><tr><td>cell</td></tr></table><a href="https://example.com/a">link</a>"#,
        );
        assert!(out.html.contains("<table>"));
        assert!(out.html.contains("<td>cell</td>"));
        assert!(out.html.contains(r#"href="https://example.com/a""#));
        assert!(out.html.contains("noopener noreferrer"));
    }

    #[test]
    fn drops_javascript_urls() {
        let out = sanitize_html(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!out.html.contains("javascript"));
    }

    #[test]
    fn keeps_allowed_schemes() {
        let out = sanitize_html(r#"<a href="mailto:a@b.c">mail</a><a href="tel:+123">call</a>"#);
        assert!(out.html.contains("mailto:a@b.c"));
        assert!(out.html.contains("tel:+123"));
    }

    const SERVER_SKELETON: &str = r#"<p>Before</p>
        <div class="inline-image-container" data-image-url="/api/messages/7/inline/att1/" data-filename="scan.png" style="position: relative; min-height: 300px;">
            <style>@keyframes shimmer-effect { 0% { background-position: -200% 0; } }</style>
            <div style="padding-bottom: 56.25%; position: relative;">
                <div class="loading-placeholder"><p>Carregando imagem...</p><p class="progress-info">0.8 MB</p></div>
            </div>
        </div>"#;

    #[test]
    fn server_skeletons_are_queued_for_loading() {
        let out = sanitize_html(SERVER_SKELETON);
        assert_eq!(
            out.inline_images,
            vec![InlineImage {
                id: "img-0".into(),
                url: "/api/messages/7/inline/att1/".into(),
            }]
        );
        assert!(out.html.contains(r#"data-image-id="img-0""#));
        assert!(out.html.contains(r#"data-image-url="/api/messages/7/inline/att1/""#));
        assert!(out.html.contains(&format!("{INLINE_IMAGE_CLASS} is-loading {LAZY_IMAGE_CONTAINER_CLASS}")));
        assert!(out.html.contains(r#"aria-label="scan.png""#));
        assert!(!out.html.contains("<style"));
    }

    #[test]
    fn remote_images_are_left_alone() {
        let out = sanitize_html(
            r#"<p><img src="https://tracker.example/pixel.gif" alt="x"><img src="data:image/png;base64,AAAA"></p>"#,
        );
        assert!(out.inline_images.is_empty());
        assert!(out.html.contains("https://tracker.example/pixel.gif"));
        assert!(out.html.contains("data:image/png"));
    }

    #[test]
    fn skeleton_urls_must_be_same_origin_or_http() {
        let out = sanitize_html(
            r#"<div class="inline-image-container" data-image-url="//evil.example/x">a</div><div class="inline-image-container" data-image-url="javascript:alert(1)">b</div><div data-image-url="/api/messages/1/inline/a/">c</div>"#,
        );
        assert!(out.inline_images.is_empty());
        assert!(!out.html.contains("data-image-id"));
    }

    #[test]
    fn marks_hidden_links() {
        let out = sanitize_html(r#"<a href="https://evil.example/phish">www.bank.com/login</a>"#);
        assert_eq!(out.hidden_links, 1);
        assert!(out.html.contains(HIDDEN_URL_CLASS));
        assert!(out.html.contains("tm-hidden-url-badge"));

        let out = sanitize_html(r#"<a href="https://evil.example/phish">Click here</a>"#);
        assert_eq!(out.hidden_links, 0);
    }

    #[test]
    fn empty_input_renders_nothing() {
        assert_eq!(sanitize_html("   "), SanitizedHtml::default());
    }

    #[test]
    fn plain_text_is_escaped_and_linked() {
        let out = render_plain_text("Hi <b>you</b>\nsee https://example.com/x.");
        assert!(out.contains("&lt;b&gt;"));
        assert!(out.contains(r#"<a href="https://example.com/x""#));
        assert!(out.contains("</a>."));
        assert!(out.contains("<br>"));
    }

    #[test]
    fn link_stops_before_markup_in_plain_text() {
        let out = render_plain_text("https://a.com<b>");
        assert!(out.contains(r#"href="https://a.com""#));
        assert!(out.contains("</a>&lt;b&gt;"));
        assert!(!out.contains("&lt;b&gt\""));

        let out = render_plain_text("https://a.com/?x=1&y=2");
        assert!(out.contains(r#"href="https://a.com/?x=1&amp;y=2""#));
    }
}
