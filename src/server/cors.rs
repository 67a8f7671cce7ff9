//! CORS policy
//!
//! `*` allows any origin. A list echoes back only the listed origins and
//! also gates websocket upgrades by their `Origin` header.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use hyper::{Response, StatusCode};

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Idempotency-Key";

/// Which origins may call the API from a browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    Any,
    List(Vec<String>),
}

impl CorsPolicy {
    /// Parse `"*"` or a comma-separated list of origins
    pub fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if origins.iter().any(|o| o == "*") {
            Self::Any
        } else {
            Self::List(origins)
        }
    }

    /// Whether a request carrying this `Origin` header may proceed.
    ///
    /// Requests without an origin are not browser cross-origin requests
    /// and are always allowed.
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (Self::Any, _) | (_, None) => true,
            (Self::List(origins), Some(origin)) => origins.iter().any(|o| o == origin),
        }
    }

    /// Value for `Access-Control-Allow-Origin`, if any
    pub fn allow_origin_value(&self, origin: Option<&str>) -> Option<String> {
        match (self, origin) {
            (Self::Any, _) => Some("*".to_string()),
            (Self::List(_), Some(origin)) if self.permits(Some(origin)) => Some(origin.to_string()),
            _ => None,
        }
    }

    /// Add CORS headers to a response
    pub fn apply<B>(&self, mut response: Response<B>, origin: Option<&str>) -> Response<B> {
        let headers = response.headers_mut();
        if let Some(value) = self
            .allow_origin_value(origin)
            .and_then(|v| HeaderValue::from_str(&v).ok())
        {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if matches!(self, Self::List(_)) {
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }
        response
    }

    /// CORS preflight response
    pub fn preflight(&self, origin: Option<&str>) -> Response<Full<Bytes>> {
        let response = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header(ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS)
            .header(ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS)
            .header(ACCESS_CONTROL_MAX_AGE, "600")
            .body(Full::new(Bytes::new()))
            .unwrap();
        self.apply(response, origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_any() {
        assert_eq!(CorsPolicy::parse("*"), CorsPolicy::Any);
        assert_eq!(CorsPolicy::parse("https://a.example, *"), CorsPolicy::Any);
    }

    #[test]
    fn test_parse_list_normalizes() {
        assert_eq!(
            CorsPolicy::parse(" https://a.example/ ,https://b.example"),
            CorsPolicy::List(vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ])
        );
    }

    #[test]
    fn test_list_echoes_allowed_origin_only() {
        let policy = CorsPolicy::parse("https://a.example");
        assert_eq!(
            policy.allow_origin_value(Some("https://a.example")).as_deref(),
            Some("https://a.example")
        );
        assert_eq!(policy.allow_origin_value(Some("https://evil.example")), None);
        assert!(!policy.permits(Some("https://evil.example")));
        assert!(policy.permits(None));
    }

    #[test]
    fn test_preflight_headers() {
        let response = CorsPolicy::Any.preflight(Some("https://a.example"));
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response.headers()[ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap()
            .contains("Idempotency-Key"));
    }
}
