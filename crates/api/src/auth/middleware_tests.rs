//! Unit tests for authentication middleware
//!
//! Tests cover:
//! - Bearer token extraction (header, cookie fallback, malformed input)
//! - Client IP extraction precedence
//! - require_auth / optional_auth request flow

#[cfg(test)]
mod tests {
    use super::super::jwt::JwtManager;
    use super::super::middleware::*;
    use axum::{
        body::Body,
        extract::Request,
        http::{header, StatusCode},
        middleware::from_fn_with_state,
        response::IntoResponse,
        routing::get,
        Extension, Router,
    };
    use pagesmith_shared::UserId;
    use tower::ServiceExt;

    fn auth_state() -> AuthState {
        AuthState {
            jwt_manager: JwtManager::new("test-jwt-secret-key-for-testing-only", 24),
        }
    }

    fn request_with_headers(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/api/v1/plan");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_from_authorization_header() {
        let request = request_with_headers(&[("Authorization", "Bearer abc.def.ghi")]);
        assert_eq!(
            extract_bearer_token(&request),
            Some("abc.def.ghi".to_string())
        );
    }

    #[test]
    fn test_bearer_token_from_cookie_fallback() {
        let request = request_with_headers(&[(
            "Cookie",
            "theme=dark; pagesmith_auth_token=tok123; locale=en",
        )]);
        assert_eq!(extract_bearer_token(&request), Some("tok123".to_string()));
    }

    #[test]
    fn test_authorization_header_wins_over_cookie() {
        let request = request_with_headers(&[
            ("Authorization", "Bearer header-token"),
            ("Cookie", "pagesmith_auth_token=cookie-token"),
        ]);
        assert_eq!(
            extract_bearer_token(&request),
            Some("header-token".to_string())
        );
    }

    #[test]
    fn test_malformed_authorization_header_ignored() {
        // Wrong scheme falls through to the cookie, which is absent here
        let request = request_with_headers(&[("Authorization", "Basic dXNlcjpwYXNz")]);
        assert_eq!(extract_bearer_token(&request), None);
    }

    #[test]
    fn test_no_credentials_yields_none() {
        let request = request_with_headers(&[]);
        assert_eq!(extract_bearer_token(&request), None);
    }

    #[test]
    fn test_ip_from_x_forwarded_for_takes_first_entry() {
        let request = request_with_headers(&[(
            "X-Forwarded-For",
            "203.0.113.7, 10.0.0.1, 172.16.0.2",
        )]);
        assert_eq!(
            extract_ip_address(&request),
            Some("203.0.113.7".to_string())
        );
    }

    #[test]
    fn test_ip_forwarded_for_beats_cloudflare_header() {
        let request = request_with_headers(&[
            ("CF-Connecting-IP", "198.51.100.9"),
            ("X-Forwarded-For", "203.0.113.7"),
        ]);
        assert_eq!(
            extract_ip_address(&request),
            Some("203.0.113.7".to_string())
        );
    }

    #[test]
    fn test_ip_cloudflare_beats_real_ip() {
        let request = request_with_headers(&[
            ("X-Real-IP", "192.0.2.33"),
            ("CF-Connecting-IP", "198.51.100.9"),
        ]);
        assert_eq!(
            extract_ip_address(&request),
            Some("198.51.100.9".to_string())
        );
    }

    #[test]
    fn test_ip_real_ip_used_last() {
        let request = request_with_headers(&[("X-Real-IP", "192.0.2.33")]);
        assert_eq!(extract_ip_address(&request), Some("192.0.2.33".to_string()));
    }

    #[test]
    fn test_ip_absent_without_proxy_headers() {
        let request = request_with_headers(&[]);
        assert_eq!(extract_ip_address(&request), None);
    }

    async fn whoami(Extension(auth_user): Extension<AuthUser>) -> impl IntoResponse {
        auth_user.user_id.to_string()
    }

    fn protected_app(state: AuthState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state, require_auth))
    }

    #[tokio::test]
    async fn test_require_auth_accepts_valid_token() {
        let state = auth_state();
        let user_id = UserId::new();
        let token = state.jwt_manager.generate_access_token(user_id).unwrap();

        let response = protected_app(state)
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, user_id.to_string().as_bytes());
    }

    #[tokio::test]
    async fn test_require_auth_rejects_missing_token() {
        let response = protected_app(auth_state())
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_auth_rejects_garbage_token() {
        let response = protected_app(auth_state())
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(header::AUTHORIZATION, "Bearer not.a.jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    async fn maybe_user(auth_user: Option<Extension<AuthUser>>) -> impl IntoResponse {
        match auth_user {
            Some(Extension(user)) => user.user_id.to_string(),
            None => "anonymous".to_string(),
        }
    }

    #[tokio::test]
    async fn test_optional_auth_passes_through_without_token() {
        let app = Router::new()
            .route("/page", get(maybe_user))
            .layer(from_fn_with_state(auth_state(), optional_auth));

        let response = app
            .oneshot(Request::builder().uri("/page").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, "anonymous".as_bytes());
    }

    #[tokio::test]
    async fn test_optional_auth_attaches_identity_when_token_valid() {
        let state = auth_state();
        let user_id = UserId::new();
        let token = state.jwt_manager.generate_access_token(user_id).unwrap();

        let app = Router::new()
            .route("/page", get(maybe_user))
            .layer(from_fn_with_state(state, optional_auth));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/page")
                    .header(header::COOKIE, format!("pagesmith_auth_token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, user_id.to_string().as_bytes());
    }
}
