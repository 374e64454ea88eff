//! Push handshake authentication.
//!
//! Tokens are HS256 JWTs. The user id may be carried either in an `id` claim
//! (string or number) or in the standard `sub` claim; when both are present,
//! `id` wins.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Handshake failures. Each one rejects the connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Invalid authorization header format")]
    InvalidFormat,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Token does not identify a user")]
    MissingIdentity,
    #[error("Token generation failed: {0}")]
    Signing(String),
}

/// The authenticated party behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Value of the `id` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimId {
    Text(String),
    Number(i64),
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// JWT claims accepted by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ClaimId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

/// Normalize claims to an [`Identity`].
///
/// Precedence: non-empty `id`, then non-empty `sub`. The display name is the
/// `username` claim, falling back to the user id.
pub fn resolve_identity(claims: &Claims) -> Result<Identity, AuthError> {
    let from_id = claims
        .id
        .as_ref()
        .map(|id| id.to_string())
        .filter(|id| !id.trim().is_empty());
    let from_sub = claims.sub.clone().filter(|sub| !sub.trim().is_empty());

    let user_id = from_id.or(from_sub).ok_or(AuthError::MissingIdentity)?;
    let username = claims
        .username
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| user_id.clone());

    Ok(Identity { user_id, username })
}

/// Pick the bearer credential from the handshake query or the
/// `Authorization: Bearer` header, in that order.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(token) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    let auth_header = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;
    let auth_str = auth_header.to_str().map_err(|_| AuthError::InvalidFormat)?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::InvalidFormat)?;

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token.to_string())
}

/// Verifies a bearer credential and decodes it to an identity.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verifier.
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: Option<String>,
    audience: Option<String>,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str, issuer: Option<String>, audience: Option<String>) -> Self {
        info!(
            "JWT verifier initialized (issuer: {}, audience: {})",
            issuer.as_deref().unwrap_or("any"),
            audience.as_deref().unwrap_or("any")
        );
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
        }
    }

    /// Sign a token for `user_id`, valid for `ttl_secs`.
    pub fn generate_token(
        &self,
        user_id: &str,
        username: Option<&str>,
        ttl_secs: u64,
    ) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Signing(e.to_string()))?
            .as_secs();

        let claims = Claims {
            id: Some(ClaimId::Text(user_id.to_string())),
            sub: None,
            username: username.map(str::to_string),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: now + ttl_secs,
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        match &self.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })
    }
}

impl IdentityVerifier for JwtIdentityVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.decode_claims(token)?;
        resolve_identity(&claims)
    }
}

impl fmt::Debug for JwtIdentityVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtIdentityVerifier")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret-key-32-chars-long!!";

    fn verifier() -> JwtIdentityVerifier {
        JwtIdentityVerifier::new(SECRET, Some("courier".to_string()), None)
    }

    fn sign(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 600
    }

    #[test]
    fn test_generate_and_verify() {
        let verifier = verifier();
        let token = verifier.generate_token("u1", Some("Ada"), 600).unwrap();
        let identity = verifier.verify(&token).unwrap();
        assert_eq!(
            identity,
            Identity {
                user_id: "u1".to_string(),
                username: "Ada".to_string(),
            }
        );
    }

    #[test]
    fn test_id_claim_wins_over_sub() {
        let claims = Claims {
            id: Some(ClaimId::Number(42)),
            sub: Some("legacy".to_string()),
            exp: future_exp(),
            ..Default::default()
        };
        let identity = resolve_identity(&claims).unwrap();
        assert_eq!(identity.user_id, "42");
        assert_eq!(identity.username, "42");

        let sub_only = Claims {
            sub: Some("legacy".to_string()),
            exp: future_exp(),
            ..Default::default()
        };
        assert_eq!(resolve_identity(&sub_only).unwrap().user_id, "legacy");

        let blank_id = Claims {
            id: Some(ClaimId::Text(" ".to_string())),
            sub: Some("legacy".to_string()),
            exp: future_exp(),
            ..Default::default()
        };
        assert_eq!(resolve_identity(&blank_id).unwrap().user_id, "legacy");
    }

    #[test]
    fn test_missing_identity() {
        let token = sign(&Claims {
            iss: Some("courier".to_string()),
            exp: future_exp(),
            ..Default::default()
        });
        assert_eq!(verifier().verify(&token), Err(AuthError::MissingIdentity));
    }

    #[test]
    fn test_expired_token() {
        let token = sign(&Claims {
            id: Some(ClaimId::Text("u1".to_string())),
            iss: Some("courier".to_string()),
            exp: 1_000,
            ..Default::default()
        });
        assert_eq!(verifier().verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn test_wrong_secret_or_issuer_is_invalid() {
        let other = JwtIdentityVerifier::new("another-secret", Some("courier".to_string()), None);
        let token = other.generate_token("u1", None, 600).unwrap();
        assert!(matches!(verifier().verify(&token), Err(AuthError::Invalid(_))));

        let wrong_issuer = JwtIdentityVerifier::new(SECRET, Some("elsewhere".to_string()), None);
        let token = wrong_issuer.generate_token("u1", None, 600).unwrap();
        assert!(matches!(verifier().verify(&token), Err(AuthError::Invalid(_))));

        assert!(matches!(
            verifier().verify("garbage"),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_extract_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(None, &headers), Err(AuthError::MissingToken));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(None, &headers), Err(AuthError::InvalidFormat));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(extract_token(None, &headers).unwrap(), "header-token");
        assert_eq!(
            extract_token(Some("query-token"), &headers).unwrap(),
            "query-token"
        );
        assert_eq!(extract_token(Some(""), &headers).unwrap(), "header-token");
    }
}
