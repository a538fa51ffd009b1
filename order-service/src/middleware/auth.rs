//! Bearer token authentication for tokens issued by the hosted auth provider.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Verifies HS256 tokens signed with the provider's shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl JwtVerifier {
    pub fn new(secret: &str, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(validation),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthClaims, AppError> {
        let data = decode::<AuthClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

/// Authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    JwtVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
            })?;

        let claims = JwtVerifier::from_ref(state).verify(token)?;

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-with-enough-length-000";

    fn token(sub: &str, exp_offset: i64, aud: Option<&str>) -> String {
        let claims = AuthClaims {
            sub: sub.to_string(),
            email: Some(format!("{}@example.com", sub)),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
            aud: aud.map(str::to_string),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_claims() {
        let verifier = JwtVerifier::new(SECRET, None);
        let claims = verifier.verify(&token("user-1", 3600, Some("authenticated"))).unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = JwtVerifier::new(SECRET, None);
        assert!(verifier.verify(&token("user-1", -3600, None)).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = JwtVerifier::new("another-secret-entirely-0000000000", None);
        assert!(verifier.verify(&token("user-1", 3600, None)).is_err());
    }

    #[test]
    fn audience_is_enforced_when_configured() {
        let verifier = JwtVerifier::new(SECRET, Some("authenticated"));
        assert!(verifier.verify(&token("user-1", 3600, Some("authenticated"))).is_ok());
        assert!(verifier.verify(&token("user-1", 3600, Some("other"))).is_err());
    }
}
