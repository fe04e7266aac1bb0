//! The isolated frame that displays HTML message bodies.
//!
//! A sanitized body is wrapped in a standalone document (own stylesheet,
//! small bootstrap script) and handed to a sandboxed iframe through
//! `srcdoc`. The sandbox allows scripts and popups but never same-origin,
//! so the body cannot reach the host page's cookies or DOM. All traffic
//! across the boundary is a [`FrameMessage`], validated on receipt.

use html_escape::encode_double_quoted_attribute;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::sanitize::{InlineImage, SanitizedHtml, ALLOWED_URL_SCHEMES};

pub const SANDBOX: &str = "allow-scripts allow-popups";

/// Largest dimension a frame may report, in CSS pixels.
const MAX_DIMENSION: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Message that recolors an already rendered frame.
    pub fn change_message(self) -> FrameMessage {
        FrameMessage::ThemeChange { theme: self }
    }

    fn colors(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Theme::Light => ("#ffffff", "#1f2328", "#0969da"),
            Theme::Dark => ("#0d1117", "#e6edf3", "#4493f8"),
        }
    }
}

/// Which side of the boundary a message travels from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FromFrame,
    ToFrame,
}

/// Everything that crosses the frame boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FrameMessage {
    /// Frame reports its content size.
    Resize { width: f64, height: f64 },
    /// A link inside the frame was clicked; navigation was suppressed.
    LinkClick { href: String, text: String },
    /// Host switched between light and dark mode.
    ThemeChange { theme: Theme },
    /// Fill an inline image placeholder. `data_url: None` shows the
    /// placeholder's error state.
    #[serde(rename_all = "camelCase")]
    UpdateInlineImage {
        image_id: String,
        data_url: Option<String>,
    },
    /// Ask the frame to report its size again.
    RecalculateSize,
}

impl FrameMessage {
    pub fn direction(&self) -> Direction {
        match self {
            FrameMessage::Resize { .. } | FrameMessage::LinkClick { .. } => Direction::FromFrame,
            _ => Direction::ToFrame,
        }
    }

    /// Parse and validate a message posted by the frame.
    pub fn from_frame(data: &Value) -> Result<Self> {
        let msg: FrameMessage = serde_json::from_value(data.clone())
            .map_err(|e| Error::Frame(format!("unrecognized message: {e}")))?;
        if msg.direction() != Direction::FromFrame {
            return Err(Error::Frame("frame may not send host messages".into()));
        }
        msg.validate()?;
        Ok(msg)
    }

    fn validate(&self) -> Result<()> {
        match self {
            FrameMessage::Resize { width, height } => {
                let ok = |v: f64| v.is_finite() && (0.0..=MAX_DIMENSION).contains(&v);
                if !ok(*width) || !ok(*height) {
                    return Err(Error::Frame(format!("bad size {width}x{height}")));
                }
            }
            FrameMessage::LinkClick { href, .. } => {
                let scheme = href
                    .split_once(':')
                    .map(|(scheme, _)| scheme.to_ascii_lowercase())
                    .unwrap_or_default();
                if !ALLOWED_URL_SCHEMES.contains(&scheme.as_str()) || scheme == "data" || scheme == "cid" {
                    return Err(Error::Frame(format!("link scheme not allowed: {href}")));
                }
            }
            FrameMessage::UpdateInlineImage { data_url: Some(url), .. } => {
                if !url.starts_with("data:image/") {
                    return Err(Error::Frame("inline image must be a data:image URL".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// JSON payload for `postMessage`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frame dimensions derived from a `Resize` report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSize {
    pub height: f64,
    pub horizontal_scroll: bool,
}

impl FrameSize {
    /// The frame grows to its content height (never scrolls vertically)
    /// and only scrolls sideways when content is wider than the container.
    pub fn fit(content_width: f64, content_height: f64, container_width: f64) -> Self {
        Self {
            height: content_height.ceil(),
            horizontal_scroll: content_width > container_width,
        }
    }
}

const BOOTSTRAP: &str = r#"(function(){
var post=function(m){parent.postMessage(m,'*');};
var report=function(){var d=document.documentElement;post({type:'resize',width:d.scrollWidth,height:d.scrollHeight});};
document.addEventListener('click',function(e){var a=e.target.closest('a[href]');if(!a)return;e.preventDefault();post({type:'link-click',href:a.getAttribute('href'),text:a.textContent||''});},true);
window.addEventListener('message',function(e){var m=e.data||{};
if(m.type==='theme-change'){document.documentElement.setAttribute('data-theme',m.theme);}
else if(m.type==='update-inline-image'){var el=document.querySelector('[data-image-id="'+m.imageId+'"]');if(!el)return;
if(m.dataUrl){var img=document.createElement('img');img.src=m.dataUrl;img.alt=el.getAttribute('aria-label')||el.getAttribute('data-filename')||'';img.onload=report;el.replaceWith(img);}
else{el.classList.remove('is-loading');el.classList.add('is-error');}}
else if(m.type==='recalculate-size'){report();}});
window.addEventListener('load',report);new ResizeObserver(report).observe(document.body);
})();"#;

/// Standalone document for the sandboxed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDocument {
    pub html: String,
    pub inline_images: Vec<InlineImage>,
}

impl FrameDocument {
    pub fn build(body: SanitizedHtml, theme: Theme) -> Self {
        let (light_bg, light_fg, light_link) = Theme::Light.colors();
        let (dark_bg, dark_fg, dark_link) = Theme::Dark.colors();
        let theme_attr = match theme {
            Theme::Light => "light",
            Theme::Dark => "dark",
        };
        let html = format!(
            r#"<!DOCTYPE html>
<html data-theme="{theme_attr}">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<base target="_blank">
<style>
html,body{{margin:0;padding:0;overflow-y:hidden;}}
body{{padding:12px;font-family:system-ui,sans-serif;line-height:1.5;word-wrap:break-word;overflow-x:auto;}}
html[data-theme="light"] body{{background:{light_bg};color:{light_fg};}}
html[data-theme="light"] a{{color:{light_link};}}
html[data-theme="dark"] body{{background:{dark_bg};color:{dark_fg};}}
html[data-theme="dark"] a{{color:{dark_link};}}
img{{max-width:100%;height:auto;}}
.tm-inline-image{{display:inline-block;min-width:120px;min-height:80px;border-radius:4px;}}
.tm-inline-image.is-loading{{background:linear-gradient(90deg,#8882 25%,#8884 50%,#8882 75%);background-size:200% 100%;animation:tm-shimmer 1.2s infinite;}}
.tm-inline-image.is-error{{background:#f8514926;}}
.tm-inline-image.is-error::after{{content:"Image unavailable";font-size:12px;padding:4px;}}
.tm-hidden-url{{text-decoration:underline wavy #d29922;}}
.tm-hidden-url-badge{{margin-left:2px;color:#d29922;cursor:help;}}
@keyframes tm-shimmer{{from{{background-position:200% 0;}}to{{background-position:-200% 0;}}}}
</style>
</head>
<body>
{body}
<script>{BOOTSTRAP}</script>
</body>
</html>"#,
            body = body.html,
        );
        Self {
            html,
            inline_images: body.inline_images,
        }
    }

    /// Value for the iframe's `srcdoc` attribute, already escaped.
    pub fn srcdoc_attribute(&self) -> String {
        encode_double_quoted_attribute(&self.html).into_owned()
    }

    /// Complete `<iframe>` element for the host page.
    pub fn iframe_tag(&self, title: &str) -> String {
        format!(
            r#"<iframe sandbox="{SANDBOX}" title="{}" srcdoc="{}" style="width:100%;border:0;"></iframe>"#,
            encode_double_quoted_attribute(title),
            self.srcdoc_attribute(),
        )
    }
}
