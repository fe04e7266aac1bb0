//! CSRF token lookup for mutating requests.

use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;

use crate::constants::{CSRF_COOKIE, SESSION_COOKIE};

/// Value of the `csrftoken` cookie the server set for `url`, if any.
pub fn csrf_token(jar: &Jar, url: &Url) -> Option<String> {
    let header = jar.cookies(url)?;
    let raw = header.to_str().ok()?;
    cookie_value(raw, CSRF_COOKIE)
}

/// Value of the server session cookie, used to resume a mailbox later.
pub fn session_id(jar: &Jar, url: &Url) -> Option<String> {
    let header = jar.cookies(url)?;
    let raw = header.to_str().ok()?;
    cookie_value(raw, SESSION_COOKIE)
}

fn cookie_value(raw: &str, name: &str) -> Option<String> {
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
