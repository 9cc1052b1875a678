use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, decode, Header, EncodingKey, DecodingKey, Validation, Algorithm};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::config::AuthConfig;
use crate::error::{AppError, AuthError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // User ID
    pub username: String,
    pub token_type: TokenType,
    pub exp: i64,           // Expiration time
    pub iat: i64,           // Issued at
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::AuthError(AuthError::InvalidToken))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
}

/// Issues and validates JWTs and hashes passwords. Holds no database handle,
/// so it can be used from extractors and middleware.
pub struct AuthService {
    jwt_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            access_ttl: Duration::minutes(config.access_token_minutes),
            refresh_ttl: Duration::days(config.refresh_token_days),
        }
    }

    pub fn hash_password(password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::InternalError(format!("Password hashing failed: {}", e)))
    }

    /// False for a wrong password and for an unparseable stored hash.
    pub fn verify_password(password: &str, password_hash: &str) -> bool {
        match PasswordHash::new(password_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    pub fn issue_tokens(&self, user: &AuthenticatedUser) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            refresh: self.generate_token(user, TokenType::Refresh, self.refresh_ttl)?,
            access: self.generate_token(user, TokenType::Access, self.access_ttl)?,
        })
    }

    pub fn issue_access_token(&self, user: &AuthenticatedUser) -> Result<String, AppError> {
        self.generate_token(user, TokenType::Access, self.access_ttl)
    }

    /// Validates an access token. The claims only name the user; role and
    /// groups are loaded from the database on every request.
    pub fn authenticate(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.decode_token(token, TokenType::Access)?;
        claims.user_id()?;
        Ok(claims)
    }

    /// Validates a refresh token and returns the user id it was issued for.
    pub fn refresh_subject(&self, token: &str) -> Result<Uuid, AppError> {
        self.decode_token(token, TokenType::Refresh)?.user_id()
    }

    fn generate_token(
        &self,
        user: &AuthenticatedUser,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            token_type,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }

    fn decode_token(&self, token: &str, expected: TokenType) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )?
        .claims;

        if claims.token_type != expected {
            return Err(AppError::AuthError(AuthError::InvalidToken));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use tokio_test::{assert_err, assert_ok};

    fn service(access_minutes: i64) -> AuthService {
        AuthService::new(&AuthConfig {
            jwt_secret: "test_secret".to_string(),
            access_token_minutes: access_minutes,
            refresh_token_days: 1,
        })
    }

    fn organizer() -> AuthenticatedUser {
        AuthenticatedUser {
            id: Uuid::new_v4(),
            username: "olivia".to_string(),
            role: Role::User,
            groups: vec!["organizer".to_string()],
        }
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = AuthService::hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(AuthService::verify_password("correct horse", &hash));
        assert!(!AuthService::verify_password("wrong horse", &hash));
        assert!(!AuthService::verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_access_token_round_trip() {
        let auth = service(60);
        let user = organizer();
        let tokens = assert_ok!(auth.issue_tokens(&user));

        let claims = assert_ok!(auth.authenticate(&tokens.access));
        assert_eq!(claims.user_id().unwrap(), user.id);
        assert_eq!(claims.username, user.username);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn test_refresh_token_is_not_an_access_token() {
        let auth = service(60);
        let user = organizer();
        let tokens = auth.issue_tokens(&user).unwrap();

        assert!(matches!(
            auth.authenticate(&tokens.refresh),
            Err(AppError::AuthError(AuthError::InvalidToken))
        ));
        assert!(matches!(
            auth.refresh_subject(&tokens.access),
            Err(AppError::AuthError(AuthError::InvalidToken))
        ));
        assert_eq!(auth.refresh_subject(&tokens.refresh).unwrap(), user.id);
    }

    #[test]
    fn test_expired_token() {
        let auth = service(-5);
        let token = auth.issue_access_token(&organizer()).unwrap();

        assert!(matches!(
            auth.authenticate(&token),
            Err(AppError::AuthError(AuthError::TokenExpired))
        ));
    }

    #[test]
    fn test_token_signed_with_other_secret() {
        let token = service(60).issue_access_token(&organizer()).unwrap();
        let other = AuthService::new(&AuthConfig {
            jwt_secret: "another_secret".to_string(),
            access_token_minutes: 60,
            refresh_token_days: 1,
        });

        assert!(matches!(
            other.authenticate(&token),
            Err(AppError::AuthError(AuthError::InvalidToken))
        ));
        assert_err!(other.authenticate("garbage"));
    }
}
