//! Request hardening: response headers, client addressing, throttling and
//! the shared-secret check on voice webhooks.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use callally_shared::RateLimiter;
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};

pub const VAPI_SECRET_HEADER: &str = "x-vapi-secret";

/// Adds the fixed security headers to every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Count one request for the caller's address and refuse it when over budget.
pub async fn enforce_rate_limit(
    limiter: &RateLimiter,
    headers: &HeaderMap,
    scope: &str,
) -> ApiResult<()> {
    let ip = client_ip(headers);
    let result = limiter.check(&format!("{}:{}", scope, ip)).await;

    if result.allowed {
        Ok(())
    } else {
        tracing::warn!(
            client_ip = %ip,
            scope = scope,
            retry_after_secs = result.retry_after_secs,
            "Rate limit exceeded"
        );
        Err(ApiError::TooManyRequests {
            retry_after_secs: result.retry_after_secs,
        })
    }
}

/// With no configured secret every request passes.
pub fn verify_vapi_secret(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected.filter(|s| !s.is_empty()) else {
        return true;
    };

    headers
        .get(VAPI_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use callally_shared::RateLimitConfig;
    use std::time::Duration;
    use tower::ServiceExt;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_ip_precedence() {
        assert_eq!(
            client_ip(&headers(&[
                ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
                ("x-real-ip", "198.51.100.2")
            ])),
            "203.0.113.7"
        );
        assert_eq!(
            client_ip(&headers(&[("x-real-ip", "198.51.100.2")])),
            "198.51.100.2"
        );
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_vapi_secret() {
        assert!(verify_vapi_secret(None, &HeaderMap::new()));
        assert!(verify_vapi_secret(Some(""), &HeaderMap::new()));
        assert!(!verify_vapi_secret(Some("s3cret"), &HeaderMap::new()));
        assert!(!verify_vapi_secret(
            Some("s3cret"),
            &headers(&[(VAPI_SECRET_HEADER, "wrong")])
        ));
        assert!(verify_vapi_secret(
            Some("s3cret"),
            &headers(&[(VAPI_SECRET_HEADER, "s3cret")])
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_scoped_by_ip() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
        });
        let a = headers(&[("x-real-ip", "198.51.100.2")]);
        let b = headers(&[("x-real-ip", "198.51.100.3")]);

        assert!(enforce_rate_limit(&limiter, &a, "auth").await.is_ok());
        assert!(matches!(
            enforce_rate_limit(&limiter, &a, "auth").await,
            Err(ApiError::TooManyRequests { .. })
        ));
        assert!(enforce_rate_limit(&limiter, &b, "auth").await.is_ok());
    }

    #[tokio::test]
    async fn test_security_headers_applied() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(security_headers_middleware));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(
            response.headers()["referrer-policy"],
            "strict-origin-when-cross-origin"
        );
    }
}
