//! Hidden-URL detection and the link confirmation step.
//!
//! A link is "hidden" when its visible text looks like an address
//! (`www.bank.com/login`) but the real target is another host. Every
//! click is routed through a [`LinkConfirmation`] regardless; the
//! warning is only raised on a mismatch.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:[a-z][a-z0-9+.-]*://)?(?:www\.)?([a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,})(?::\d+)?(?:[/?#]|$)")
            .expect("static regex")
    })
}

/// Domain implied by visible link text, when the text looks like one.
pub fn visible_domain(text: &str) -> Option<String> {
    let text = text.trim();
    if !(text.contains('.') || text.contains('/')) {
        return None;
    }
    domain_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Host the link really points at (`www.` stripped), for http(s) links.
pub fn target_host(href: &str) -> Option<String> {
    let url = Url::parse(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

fn same_site(a: &str, b: &str) -> bool {
    a == b || a.ends_with(&format!(".{b}")) || b.ends_with(&format!(".{a}"))
}

/// Result of comparing a link's text with its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAssessment {
    pub href: String,
    pub visible_domain: Option<String>,
    pub target_host: Option<String>,
    pub hidden: bool,
}

pub fn assess_link(text: &str, href: &str) -> LinkAssessment {
    let visible = visible_domain(text);
    let target = target_host(href);
    let hidden = match (&visible, &target) {
        (Some(visible), Some(target)) => !same_site(visible, target),
        _ => false,
    };
    LinkAssessment {
        href: href.trim().to_string(),
        visible_domain: visible,
        target_host: target,
        hidden,
    }
}

/// The interstitial shown before leaving for an external link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfirmation {
    assessment: LinkAssessment,
}

impl LinkConfirmation {
    pub fn new(text: &str, href: &str) -> Self {
        Self {
            assessment: assess_link(text, href),
        }
    }

    /// The true destination, shown verbatim.
    pub fn destination(&self) -> &str {
        &self.assessment.href
    }

    pub fn is_hidden_url(&self) -> bool {
        self.assessment.hidden
    }

    /// Warning line, only for mismatched links.
    pub fn warning(&self) -> Option<String> {
        if !self.assessment.hidden {
            return None;
        }
        Some(format!(
            "The link text shows {} but it actually leads to {}.",
            self.assessment.visible_domain.as_deref().unwrap_or("another site"),
            self.assessment.target_host.as_deref().unwrap_or("an unknown site"),
        ))
    }

    /// Open the destination in the system browser after explicit consent.
    pub fn open(self, confirmed: bool) -> std::io::Result<bool> {
        if !confirmed {
            return Ok(false);
        }
        open::that(self.assessment.href)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_mismatched_domain() {
        let a = assess_link("www.bank.com/login", "https://evil.example/phish");
        assert!(a.hidden);
        assert_eq!(a.visible_domain.as_deref(), Some("bank.com"));
        assert_eq!(a.target_host.as_deref(), Some("evil.example"));
    }

    #[test]
    fn plain_text_is_never_flagged() {
        assert!(!assess_link("Click here", "https://evil.example/phish").hidden);
        assert!(!assess_link("", "https://evil.example").hidden);
    }

    #[test]
    fn matching_and_subdomains_are_safe() {
        assert!(!assess_link("https://www.bank.com", "https://bank.com/x").hidden);
        assert!(!assess_link("bank.com", "https://login.bank.com/").hidden);
        assert!(!assess_link("secure.bank.com/a", "https://bank.com").hidden);
    }

    #[test]
    fn lookalike_suffix_is_not_a_subdomain() {
        assert!(assess_link("bank.com", "https://notbank.com").hidden);
    }

    #[test]
    fn non_http_targets_are_not_compared() {
        assert!(!assess_link("support@bank.com", "mailto:x@evil.example").hidden);
        assert!(!assess_link("bank.com", "tel:+155555").hidden);
    }

    #[test]
    fn confirmation_warns_only_on_mismatch() {
        let safe = LinkConfirmation::new("Docs", "https://docs.rs");
        assert_eq!(safe.destination(), "https://docs.rs");
        assert!(safe.warning().is_none());

        let bad = LinkConfirmation::new("paypal.com", "http://paypa1.example/");
        assert!(bad.is_hidden_url());
        assert!(bad.warning().unwrap().contains("paypa1.example"));
    }

    #[test]
    fn declined_link_is_not_opened() {
        let link = LinkConfirmation::new("x", "https://example.com");
        assert!(!link.open(false).unwrap());
    }
}
