// src/manager/cookie.rs
// Cookie header parsing and Set-Cookie construction

use axum::http::header::{COOKIE, HeaderMap};
use axum::http::HeaderValue;
use cookie::Cookie;
use cookie::time::Duration;

use crate::config::ManagerConfig;
use crate::error::{SessionError, SessionResult};

/// Value of the first cookie called `name` across all `Cookie` headers.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// Session cookie carrying `token`. Always path `/` and HttpOnly.
pub fn session_cookie(config: &ManagerConfig, token: &str) -> Cookie<'static> {
    let mut builder = Cookie::build((config.cookie_name.clone(), token.to_string()))
        .path("/")
        .http_only(true)
        .secure(config.secure);

    if config.cookie_lifetime > 0 {
        let secs = i64::try_from(config.cookie_lifetime).unwrap_or(i64::MAX);
        builder = builder.max_age(Duration::seconds(secs));
    }
    if let Some(domain) = &config.domain {
        builder = builder.domain(domain.clone());
    }

    builder.build()
}

/// Cookie that tells the browser to drop the session cookie.
pub fn removal_cookie(config: &ManagerConfig) -> Cookie<'static> {
    let mut cookie = session_cookie(config, "");
    cookie.make_removal();
    cookie
}

pub fn to_header_value(cookie: &Cookie<'_>) -> SessionResult<HeaderValue> {
    HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| SessionError::config(format!("cookie not representable as a header: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_cookie_among_many() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; lang=en"));
        headers.append(COOKIE, HeaderValue::from_static("sessionid=abc123; other=1"));
        assert_eq!(find_cookie(&headers, "sessionid").as_deref(), Some("abc123"));
        assert_eq!(find_cookie(&headers, "lang").as_deref(), Some("en"));
        assert_eq!(find_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_empty_cookie_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("sessionid="));
        assert_eq!(find_cookie(&headers, "sessionid"), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let config = ManagerConfig {
            cookie_lifetime: 120,
            secure: true,
            domain: Some("example.com".to_string()),
            ..Default::default()
        };
        let rendered = session_cookie(&config, "tok").to_string();
        assert!(rendered.starts_with("sessionid=tok"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("Domain=example.com"));
        assert!(rendered.contains("Max-Age=120"));
    }

    #[test]
    fn test_browser_session_cookie_has_no_max_age() {
        let rendered = session_cookie(&ManagerConfig::default(), "tok").to_string();
        assert!(!rendered.contains("Max-Age"));
        assert!(!rendered.contains("Secure"));
    }

    #[test]
    fn test_removal_cookie() {
        let rendered = removal_cookie(&ManagerConfig::default()).to_string();
        assert!(rendered.starts_with("sessionid=;"));
        assert!(rendered.contains("Max-Age=0"));
        assert!(to_header_value(&removal_cookie(&ManagerConfig::default())).is_ok());
    }
}
