//! Validation for the "edit username" flow.
//!
//! Input is normalized locally so that invalid names never reach the
//! server: accents are folded to ASCII, a pasted full address is cut down
//! to its local part, and the result is composed with the mailbox's
//! current domain.

use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Why a username was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("username cannot be empty")]
    Empty,
    #[error("username cannot start or end with a dot")]
    EdgeDot,
    #[error("username may only contain letters, numbers, dots, hyphens and underscores")]
    InvalidCharacters,
    #[error("current address has no domain")]
    MissingDomain,
}

/// Outcome of validating a new username against the current address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsernameChange {
    /// Same address as now; nothing to send.
    Unchanged,
    /// Full address to request.
    Changed(String),
}

fn allowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("static regex"))
}

/// Fold accented characters to their base ASCII letters (`ã` → `a`).
pub fn fold_accents(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Trim, strip any `@domain`, fold accents and check the allowed set.
pub fn normalize_username(input: &str) -> Result<String, UsernameError> {
    let trimmed = input.trim();
    let local = trimmed
        .split_once('@')
        .map_or(trimmed, |(local, _)| local)
        .trim();
    let folded = fold_accents(local);

    if folded.is_empty() {
        return Err(UsernameError::Empty);
    }
    if folded.starts_with('.') || folded.ends_with('.') {
        return Err(UsernameError::EdgeDot);
    }
    if !allowed().is_match(&folded) {
        return Err(UsernameError::InvalidCharacters);
    }
    Ok(folded)
}

/// Validate `input` and compose it with the domain of `current_email`.
pub fn validate_change(input: &str, current_email: &str) -> Result<UsernameChange, UsernameError> {
    let local = normalize_username(input)?;
    let (_, domain) = current_email
        .split_once('@')
        .filter(|(_, domain)| !domain.is_empty())
        .ok_or(UsernameError::MissingDomain)?;
    let address = format!("{local}@{domain}");
    if address == current_email {
        Ok(UsernameChange::Unchanged)
    } else {
        Ok(UsernameChange::Changed(address))
    }
}

/// Random lowercase username of 6 to 32 characters, for a rename that
/// does not care about the name.
pub fn generate_random_username(len: usize) -> String {
    let length = len.clamp(6, 32);
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_accents() {
        assert_eq!(normalize_username("João.Pedro").unwrap(), "Joao.Pedro");
        assert_eq!(normalize_username("  ação ").unwrap(), "acao");
    }

    #[test]
    fn strips_pasted_domain() {
        let change = validate_change("test@other.com", "old@mail.example").unwrap();
        assert_eq!(change, UsernameChange::Changed("test@mail.example".into()));
    }

    #[test]
    fn rejects_edge_dots() {
        assert_eq!(normalize_username(".joe"), Err(UsernameError::EdgeDot));
        assert_eq!(normalize_username("joe."), Err(UsernameError::EdgeDot));
        assert!(normalize_username("jo.e").is_ok());
    }

    #[test]
    fn rejects_characters_outside_allowed_set() {
        assert_eq!(
            normalize_username("joe smith"),
            Err(UsernameError::InvalidCharacters)
        );
        assert_eq!(normalize_username("joe+1"), Err(UsernameError::InvalidCharacters));
        assert_eq!(normalize_username("日本"), Err(UsernameError::InvalidCharacters));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(normalize_username("   "), Err(UsernameError::Empty));
        assert_eq!(normalize_username("@mail.example"), Err(UsernameError::Empty));
    }

    #[test]
    fn same_address_is_unchanged() {
        let change = validate_change("joe", "joe@mail.example").unwrap();
        assert_eq!(change, UsernameChange::Unchanged);
    }

    #[test]
    fn normalized_output_matches_allowed_pattern() {
        for input in ["Zoë_99", "Ñandú-x", "a.b.c"] {
            let out = normalize_username(input).unwrap();
            assert!(allowed().is_match(&out), "{out}");
            assert!(!out.starts_with('.') && !out.ends_with('.'));
        }
    }

    #[test]
    fn random_usernames_are_valid() {
        let name = generate_random_username(3);
        assert_eq!(name.len(), 6);
        assert_eq!(normalize_username(&name).unwrap(), name);
        assert_eq!(generate_random_username(100).len(), 32);
    }
}
