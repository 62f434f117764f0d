use actix_web::dev::Payload;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use thiserror::Error;

use crate::store::{Store, StoreError};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,    // expiration timestamp
    pub iat: i64,    // issued at
}

pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(password, 10)
    }

    /// Verify a password against a bcrypt hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        bcrypt::verify(password, hash)
    }

    /// Issue a JWT for a user, valid for 7 days
    pub fn generate_token(&self, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + Duration::days(7);

        let claims = Claims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
    }

    /// Validate a JWT and return the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }
}

/// Session-guard failures. All credential failures map to 401; only a
/// missing service registration is a server fault.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Access denied. No token provided, please login first.")]
    MissingCredential,
    #[error("Authentication failed. Invalid token.")]
    InvalidCredential,
    #[error("User not found. Authentication required.")]
    UnknownSubject,
    #[error("Authentication service unavailable")]
    Internal,
}

impl ResponseError for AuthError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AuthError::Internal => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            _ => actix_web::http::StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

/// Actor identity resolved from the bearer credential. Extracting this from
/// a request is the Session Guard: it must succeed before any workflow
/// operation runs, and it is read-only.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl actix_web::FromRequest for AuthUser {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(resolve_bearer(req))
    }
}

fn resolve_bearer(req: &HttpRequest) -> Result<AuthUser, AuthError> {
    let auth_service = req
        .app_data::<web::Data<AuthService>>()
        .ok_or(AuthError::Internal)?;
    let store = req
        .app_data::<web::Data<Store>>()
        .ok_or(AuthError::Internal)?;

    let header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingCredential)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidCredential)?;

    let claims = auth_service
        .validate_token(token)
        .map_err(|_| AuthError::InvalidCredential)?;

    // The subject must still resolve to a stored user
    match store.user_summary(&claims.sub) {
        Ok(_) => Ok(AuthUser {
            user_id: claims.sub,
        }),
        Err(StoreError::NotFound(_)) => Err(AuthError::UnknownSubject),
        Err(_) => Err(AuthError::Internal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hashing() {
        let auth = AuthService::new("test_secret".to_string());
        let password = "my_secure_password";

        let hash = auth.hash_password(password).unwrap();
        assert!(auth.verify_password(password, &hash).unwrap());
        assert!(!auth.verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_jwt_token() {
        let auth = AuthService::new("test_secret".to_string());
        let user_id = "user_123";

        let token = auth.generate_token(user_id).unwrap();
        let claims = auth.validate_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let auth = AuthService::new("test_secret".to_string());
        assert!(auth.validate_token("not.a.jwt").is_err());
    }

    #[test]
    fn test_token_signed_with_other_secret_rejected() {
        let auth = AuthService::new("test_secret".to_string());
        let other = AuthService::new("different_secret".to_string());

        let token = other.generate_token("user_123").unwrap();
        assert!(auth.validate_token(&token).is_err());
    }
}
