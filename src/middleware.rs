//! Request admission. Blocked IPs are refused before any route runs.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::abuse;
use crate::error::AppError;
use crate::state::AppState;

/// Client address as reported by the reverse proxy. The first hop of
/// `X-Forwarded-For` wins, then `X-Real-IP`. The socket address is not
/// consulted; behind the proxy it is always the proxy itself.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Refuses requests from blocked IPs with a fixed 403. Admission fails
/// open if the database is unavailable: a degraded block list must not
/// take the whole service down with it.
pub async fn reject_blocked_ips(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(ip) = client_ip(request.headers()) {
        let blocked = state
            .db()
            .and_then(|mut conn| abuse::is_ip_blocked(&mut conn, &ip));
        match blocked {
            Ok(true) => {
                tracing::info!(ip = %ip, "blocked ip refused");
                return AppError::forbidden("access denied").into_response();
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = ?err, "ip block check failed, admitting");
            }
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn forwarded_for_first_hop_wins() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
            ("x-real-ip", "198.51.100.7"),
        ]);
        assert_eq!(client_ip(&map), Some("203.0.113.9".to_string()));
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let map = headers(&[("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_ip(&map), Some("198.51.100.7".to_string()));
    }

    #[test]
    fn no_proxy_headers_means_no_ip() {
        assert_eq!(client_ip(&HeaderMap::new()), None);
        let map = headers(&[("x-forwarded-for", "  ")]);
        assert_eq!(client_ip(&map), None);
    }
}
