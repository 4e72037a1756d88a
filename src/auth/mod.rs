use crate::errors::ServiceError;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// JWT claims carried by caller identity tokens. Tokens are issued by an
/// upstream authentication service; this crate only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Actor id
    pub sub: String,
    /// Whether the caller holds the admin role
    #[serde(default)]
    pub admin: bool,
    /// Stores the caller is authorized to operate against
    #[serde(default)]
    pub stores: Vec<i64>,
    /// The caller's home store, if any
    #[serde(default)]
    pub primary_store: Option<i64>,
    /// Expiry (seconds since epoch)
    pub exp: usize,
}

/// Immutable capability descriptor for one request.
///
/// Built exactly once per request from the verified token and passed by
/// value; downstream code never re-derives scope from raw request data or
/// role strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreScope {
    pub actor_id: String,
    pub is_admin: bool,
    pub allowed_store_ids: Vec<i64>,
    pub primary_store_id: Option<i64>,
}

impl From<Claims> for StoreScope {
    fn from(claims: Claims) -> Self {
        Self {
            actor_id: claims.sub,
            is_admin: claims.admin,
            allowed_store_ids: claims.stores,
            primary_store_id: claims.primary_store,
        }
    }
}

impl StoreScope {
    /// Resolve which store this caller acts on, given an optional
    /// per-request store hint.
    ///
    /// Admin callers may address any store; without a hint they fall back
    /// to their primary store, then the first allowed store. Non-admin
    /// callers are refused outright when the hint lies outside their
    /// allowed set.
    pub fn resolve_active_store(
        &self,
        requested_store_id: Option<i64>,
    ) -> Result<Option<i64>, ServiceError> {
        if self.is_admin {
            return Ok(requested_store_id
                .or(self.primary_store_id)
                .or_else(|| self.allowed_store_ids.first().copied()));
        }

        if let Some(requested) = requested_store_id {
            if !self.allowed_store_ids.contains(&requested) {
                return Err(ServiceError::Forbidden(format!(
                    "store {} is outside the caller's scope",
                    requested
                )));
            }
            return Ok(Some(requested));
        }

        Ok(self
            .primary_store_id
            .or_else(|| self.allowed_store_ids.first().copied()))
    }

    /// Resolve and insist on a concrete store id.
    pub fn require_active_store(
        &self,
        requested_store_id: Option<i64>,
    ) -> Result<i64, ServiceError> {
        self.resolve_active_store(requested_store_id)?
            .ok_or_else(|| ServiceError::ValidationError("storeId required".to_string()))
    }

    /// Same as `require_active_store`, except admin callers may proceed
    /// without any store (e.g. cross-store listings).
    pub fn require_active_store_unless_admin(
        &self,
        requested_store_id: Option<i64>,
    ) -> Result<Option<i64>, ServiceError> {
        let resolved = self.resolve_active_store(requested_store_id)?;
        if resolved.is_none() && !self.is_admin {
            return Err(ServiceError::ValidationError(
                "storeId required".to_string(),
            ));
        }
        Ok(resolved)
    }
}

/// Verify a bearer token and produce the caller's claims.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))
}

/// Issue a token for the given claims. Used by tests and local tooling;
/// production tokens come from the upstream auth service.
pub fn issue_token(claims: &Claims, secret: &str) -> Result<String, ServiceError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("failed to sign token: {}", e)))
}

/// Axum middleware: verify the Authorization header and attach the caller's
/// `StoreScope` to the request extensions.
pub async fn authenticate(
    State(jwt_secret): State<String>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

    let claims = validate_token(token, &jwt_secret)?;
    let scope = StoreScope::from(claims);
    debug!(actor = %scope.actor_id, admin = scope.is_admin, "caller authenticated");

    request.extensions_mut().insert(scope);
    Ok(next.run(request).await)
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for StoreScope
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<StoreScope>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("caller scope not established".to_string()))
    }
}
