use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::error::{ApiError, ErrorCode};
use crate::models::{User, UserStatus};
use crate::repo::{AccountRepo, RepoError};
use crate::visibility::ViewerIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id of the signed-in user.
    pub sub: String,
    pub exp: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("JWT_SECRET not set")]
    MissingSecret,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

fn jwt_secret() -> Result<String, TokenError> {
    env::var("JWT_SECRET").map_err(|_| TokenError::MissingSecret)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, TokenError> {
    let secret = jwt_secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`. Use `Option<Auth>` where signing in
/// is optional.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> &str {
        &self.0.sub
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(e) => {
                    tracing::debug!("rejected bearer token: {e}");
                    ready(Err(ApiError::Auth(ErrorCode::InvalidToken).into()))
                }
            };
        }
        ready(Err(ApiError::Auth(ErrorCode::NotLoggedIn).into()))
    }
}

/// Create a 24h JWT for `user_id`.
pub fn create_jwt(user_id: &str) -> Result<String, TokenError> {
    let secret = jwt_secret()?;
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;
    let claims = Claims { sub: user_id.to_string(), exp: expiration };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}

/// Salted Argon2 hash in PHC string form.
pub fn hash_password(plain: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("password hash error: {e}")))
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!("stored password hash is unreadable: {e}");
            false
        }
    }
}

/// Loads the signed-in account, rejecting tokens for unknown or withdrawn users.
pub async fn active_user<R: AccountRepo + ?Sized>(repo: &R, auth: &Auth) -> Result<User, ApiError> {
    let user = repo
        .get_user(auth.user_id())
        .await
        .map_err(ApiError::not_found_as(ErrorCode::UserNotFound))?;
    if user.status != UserStatus::Active {
        return Err(ApiError::Auth(ErrorCode::NotActiveAccount));
    }
    Ok(user)
}

/// Resolves an optional bearer identity into the viewer passed to the core.
pub async fn resolve_viewer<R: AccountRepo + ?Sized>(
    repo: &R,
    auth: Option<&Auth>,
) -> Result<Option<ViewerIdentity>, ApiError> {
    match auth {
        Some(auth) => {
            let user = active_user(repo, auth).await?;
            Ok(Some(ViewerIdentity { user_id: user.id, blog_id: user.blog_id }))
        }
        None => Ok(None),
    }
}

/// Read-path variant of [`resolve_viewer`]: a token whose account is gone or
/// no longer active reads as an anonymous visitor.
pub async fn optional_viewer<R: AccountRepo + ?Sized>(
    repo: &R,
    auth: Option<&Auth>,
) -> Result<Option<ViewerIdentity>, ApiError> {
    let Some(auth) = auth else { return Ok(None) };
    match repo.get_user(auth.user_id()).await {
        Ok(user) if user.status == UserStatus::Active => {
            Ok(Some(ViewerIdentity { user_id: user.id, blog_id: user.blog_id }))
        }
        Ok(_) | Err(RepoError::NotFound) => {
            tracing::debug!(user_id = auth.user_id(), "token for inactive account read as anonymous");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let a = hash_password("pw").unwrap();
        let b = hash_password("pw").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("pw", &a));
        assert!(!verify_password("other", &a));
        assert!(!verify_password("pw", "not-a-phc-string"));
    }

    #[cfg(feature = "inmem-store")]
    #[tokio::test]
    async fn withdrawn_or_unknown_tokens_read_as_anonymous() {
        use crate::models::{NewBlog, NewUser};
        use crate::repo::inmem::InMemRepo;

        let repo = InMemRepo::new();
        let (mut user, _) = repo
            .create_account(
                NewUser { id: "alice".into(), email: "a@test".into(), password_hash: "x".into(), nickname: "A".into() },
                NewBlog { owner_id: "alice".into(), name: "b".into(), intro: String::new() },
            )
            .await
            .unwrap();
        let token = |sub: &str| Auth(Claims { sub: sub.into(), exp: usize::MAX });

        let alice = token("alice");
        let viewer = optional_viewer(&repo, Some(&alice)).await.unwrap().unwrap();
        assert_eq!(viewer.blog_id, user.blog_id);
        assert!(optional_viewer(&repo, Some(&token("ghost"))).await.unwrap().is_none());
        assert!(optional_viewer(&repo, None).await.unwrap().is_none());

        user.status = UserStatus::Withdraw;
        repo.save_user(&user).await.unwrap();
        assert!(optional_viewer(&repo, Some(&alice)).await.unwrap().is_none());
        // writes still refuse the account outright
        let err = resolve_viewer(&repo, Some(&alice)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotActiveAccount);
    }
}
