//! Authentication middleware.
//!
//! Resolves the `X-API-Key` header to a tenant via the external tenant
//! store and injects [`AuthContext`] into request extensions. No caching:
//! every request reads the store, so credential revocation takes effect
//! immediately.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use promptgate_core::AuthContext;
use serde::Serialize;
use std::sync::Arc;

use crate::inspect::AppState;

/// API error response body.
#[derive(Debug, Serialize)]
struct ApiError {
    error: ApiErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Build a JSON auth error response.
fn auth_error(status: StatusCode, message: &str) -> Response {
    let body = ApiError {
        error: ApiErrorDetail {
            message: message.to_string(),
            error_type: "auth_error".to_string(),
        },
    };
    (status, Json(body)).into_response()
}

/// Axum middleware that resolves the API credential and injects
/// [`AuthContext`].
///
/// 1. Missing `X-API-Key` header → 401
/// 2. Tenant store unreachable → 503
/// 3. No tenant owns the key → 401
/// 4. Otherwise the resolved [`AuthContext`] is attached to the request
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let Some(api_key) = api_key else {
        return auth_error(StatusCode::UNAUTHORIZED, "Missing API key");
    };

    match state.stores.tenants.get_by_api_key(&api_key).await {
        Ok(Some(tenant)) => {
            req.extensions_mut().insert(AuthContext { tenant });
            next.run(req).await
        }
        Ok(None) => auth_error(StatusCode::UNAUTHORIZED, "Invalid API key"),
        Err(e) => {
            tracing::error!("Tenant lookup failed: {e}");
            auth_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Authentication service unavailable",
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::middleware;
    use axum::routing::get;
    use axum::{Extension, Router};
    use chrono::Utc;
    use promptgate_core::{GatewayConfig, Tenant, TenantId, Tier};
    use tower::ServiceExt;

    /// Handler that echoes the authenticated tenant's identity.
    async fn whoami(Extension(ctx): Extension<AuthContext>) -> String {
        ctx.tenant.identity.clone()
    }

    async fn test_app() -> (Arc<AppState>, Router) {
        let state = AppState::from_config(GatewayConfig::default())
            .await
            .unwrap();
        let app = Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state.clone());
        (state, app)
    }

    fn request(key: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let (_state, app) = test_app().await;
        let resp = app.oneshot(request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(resp.into_body(), 1 << 16).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["message"], "Missing API key");
    }

    #[tokio::test]
    async fn test_unknown_key_is_unauthorized() {
        let (_state, app) = test_app().await;
        let resp = app.oneshot(request(Some("pg_bogus"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(resp.into_body(), 1 << 16).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["message"], "Invalid API key");
    }

    #[tokio::test]
    async fn test_valid_key_injects_context() {
        let (state, app) = test_app().await;
        state
            .stores
            .tenants
            .create(&Tenant {
                id: TenantId::new(),
                identity: "carol@example.com".to_string(),
                tier: Tier::Enterprise,
                api_key: "pg_live_carol".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let resp = app.oneshot(request(Some("pg_live_carol"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1 << 16).await.unwrap();
        assert_eq!(&body[..], b"carol@example.com");
    }
}
