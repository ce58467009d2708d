//! JWT + team-scoping middleware (spec.md §6): every control-plane request
//! carries a bearer token and a `teamId`; this layer validates the token,
//! builds a `TenantContext`, and stashes it on request extensions for
//! handlers to pull out via the `TenantContext` extractor. Grounded in the
//! teacher's `core::middleware` `AuthenticatedUser`/`RequestContext`
//! extension-based extractor pattern, narrowed to this crate's single
//! `TenantContext` shape.

use axum::extract::{FromRequestParts, Query, State};
use axum::http::{header::AUTHORIZATION, request::Parts, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{async_trait, Json};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::shared::TenantContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
pub struct TeamQuery {
    #[serde(rename = "teamId")]
    pub team_id: Option<Uuid>,
}

fn unauthorized(msg: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"success": false, "error": msg}))).into_response()
}

pub fn decode_token(token: &str, jwt: &JwtConfig) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(jwt.secret.as_bytes());
    decode::<Claims>(token, &key, &validation).map(|data| data.claims)
}

/// Extracts the bearer token, decodes it, resolves the `teamId` from the
/// query string, and inserts a `TenantContext` into request extensions.
pub async fn require_tenant_context(
    State(jwt): State<Arc<JwtConfig>>,
    Query(team_query): Query<TeamQuery>,
    mut request: axum::extract::Request,
    next: Next,
) -> Response {
    let token = match request.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => return unauthorized("missing bearer token"),
    };

    let claims = match decode_token(token, &jwt) {
        Ok(claims) => claims,
        Err(_) => return unauthorized("invalid token"),
    };

    let Some(team_id) = team_query.team_id else {
        return unauthorized("missing teamId");
    };

    let ctx = TenantContext::new(team_id, claims.role).with_user(claims.sub);
    request.extensions_mut().insert(ctx);
    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<TenantContext>().cloned().ok_or((
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "tenant context not available"})),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn jwt_config() -> JwtConfig {
        JwtConfig { secret: "test-secret".into(), issuer: "wa-analytics-server".into() }
    }

    #[test]
    fn decodes_a_token_signed_with_the_same_secret() {
        let jwt = jwt_config();
        let claims = Claims { sub: Uuid::new_v4(), role: "admin".into(), exp: (chrono::Utc::now().timestamp() + 3600) };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(jwt.secret.as_bytes())).unwrap();
        let decoded = decode_token(&token, &jwt).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.role, "admin");
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let jwt = jwt_config();
        let claims = Claims { sub: Uuid::new_v4(), role: "admin".into(), exp: (chrono::Utc::now().timestamp() + 3600) };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"other-secret")).unwrap();
        assert!(decode_token(&token, &jwt).is_err());
    }
}
