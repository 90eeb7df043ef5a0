//! JWT access token issuing and validation

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use pagesmith_shared::UserId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::middleware::AuthError;

/// Claims carried in a Pagesmith access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: UserId,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Issues and validates HS256 access tokens
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Generate an access token for a user
    pub fn generate_access_token(&self, user_id: UserId) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id,
            iat: now,
            exp: now + self.expiry_hours * 3600,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to encode token: {e}")))
    }

    /// Validate an access token and return its claims
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("test-secret-key-for-jwt-tests", 24)
    }

    #[test]
    fn test_token_round_trip() {
        let manager = manager();
        let user_id = UserId::new();

        let token = manager.generate_access_token(user_id).unwrap();
        let claims = manager.validate_access_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = manager();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: UserId::new(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-jwt-tests"),
        )
        .unwrap();

        assert!(manager.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let manager = manager();
        let token = manager.generate_access_token(UserId::new()).unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });

        assert!(manager.validate_access_token(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtManager::new("secret-one", 24);
        let verifier = JwtManager::new("secret-two", 24);

        let token = issuer.generate_access_token(UserId::new()).unwrap();
        assert!(verifier.validate_access_token(&token).is_err());
    }
}
