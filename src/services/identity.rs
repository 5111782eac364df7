use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when verifying a caller's identity
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Token has no subject")]
    MissingSubject,
}

/// Authenticated caller on whose behalf a mutation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// HS256 bearer token verifier backed by the identity provider's shared secret
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl TokenVerifier {
    pub fn new(secret: &str, issuer: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
        }
    }

    /// Verify a raw token and extract the principal
    pub fn verify(&self, token: &str) -> Result<Principal, IdentityError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let subject = data.claims.sub.trim();
        if subject.is_empty() {
            return Err(IdentityError::MissingSubject);
        }

        Ok(Principal {
            user_id: subject.to_string(),
            name: data.claims.name,
        })
    }

    /// Verify the value of an `Authorization` header
    pub fn verify_header(&self, header: Option<&str>) -> Result<Principal, IdentityError> {
        let token = header.and_then(bearer_token).ok_or(IdentityError::MissingToken)?;
        self.verify(token)
    }

    /// Sign a token for `user_id`, used by local tooling and tests
    pub fn issue(&self, user_id: &str, ttl: chrono::Duration) -> Result<String, IdentityError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + ttl).timestamp(),
            iss: self.issuer.clone(),
            name: None,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }
}

/// Extract the token from a `Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
