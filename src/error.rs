use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;

/// Machine-readable failure reasons surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotValidFormInput,
    NotLoginAnonymousComment,
    NotSecretWhenAnonymous,
    NotLoggedIn,
    InvalidToken,
    MismatchId,
    MismatchPassword,
    NotActiveAccount,
    PostNotFound,
    CommentNotFound,
    UserNotFound,
    BlogNotFound,
    AlreadyDeleteBlog,
    AlreadySameEmail,
    AlreadySameId,
    NotValidFile,
    UnsupportedMediaType,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotValidFormInput => "NOT_VALID_FORM_INPUT",
            ErrorCode::NotLoginAnonymousComment => "NOT_LOGIN_ANONYMOUS_COMMENT",
            ErrorCode::NotSecretWhenAnonymous => "NOT_SECRET_WHEN_ANONYMOUS",
            ErrorCode::NotLoggedIn => "NOT_LOGGED_IN",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::MismatchId => "MISMATCH_ID",
            ErrorCode::MismatchPassword => "MISMATCH_PASSWORD",
            ErrorCode::NotActiveAccount => "NOT_ACTIVE_ACCOUNT",
            ErrorCode::PostNotFound => "POST_NOT_FOUND",
            ErrorCode::CommentNotFound => "COMMENT_NOT_FOUND",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::BlogNotFound => "BLOG_NOT_FOUND",
            ErrorCode::AlreadyDeleteBlog => "ALREADY_DELETE_BLOG",
            ErrorCode::AlreadySameEmail => "ALREADY_SAME_EMAIL",
            ErrorCode::AlreadySameId => "ALREADY_SAME_ID",
            ErrorCode::NotValidFile => "NOT_VALID_FILE",
            ErrorCode::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::NotValidFormInput => "form input is missing or invalid",
            ErrorCode::NotLoginAnonymousComment => "sign in to post a non-anonymous comment",
            ErrorCode::NotSecretWhenAnonymous => "anonymous comments cannot be secret",
            ErrorCode::NotLoggedIn => "authorization required",
            ErrorCode::InvalidToken => "invalid or expired token",
            ErrorCode::MismatchId => "account does not match the signed-in user",
            ErrorCode::MismatchPassword => "password does not match",
            ErrorCode::NotActiveAccount => "account is not active",
            ErrorCode::PostNotFound => "post not found",
            ErrorCode::CommentNotFound => "comment not found",
            ErrorCode::UserNotFound => "user not found",
            ErrorCode::BlogNotFound => "blog not found",
            ErrorCode::AlreadyDeleteBlog => "blog is already deleted",
            ErrorCode::AlreadySameEmail => "email is already registered",
            ErrorCode::AlreadySameId => "id is already registered",
            ErrorCode::NotValidFile => "file is missing or invalid",
            ErrorCode::UnsupportedMediaType => "unsupported media type",
            ErrorCode::NotFound => "not found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Internal => "internal error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] Validation(ErrorCode),
    #[error("{0}")] Auth(ErrorCode),
    #[error("{0}")] NotFound(ErrorCode),
    #[error("{0}")] Conflict(ErrorCode),
    #[error("internal error: {0}")] Internal(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Validation(c) | ApiError::Auth(c) | ApiError::NotFound(c) | ApiError::Conflict(c) => *c,
            ApiError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Maps a repository `NotFound` onto a domain-specific code.
    pub fn not_found_as(code: ErrorCode) -> impl FnOnce(RepoError) -> ApiError {
        move |e| match e {
            RepoError::NotFound => ApiError::NotFound(code),
            other => other.into(),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound(ErrorCode::NotFound),
            RepoError::Conflict => ApiError::Conflict(ErrorCode::Conflict),
            RepoError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Validation(ErrorCode::UnsupportedMediaType) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(
                ErrorCode::NotLoggedIn | ErrorCode::InvalidToken | ErrorCode::NotLoginAnonymousComment,
            ) => StatusCode::UNAUTHORIZED,
            ApiError::Auth(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                format!("request failed: {detail}")
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ApiErrorBody {
            success: false,
            code: self.code().as_str(),
            message,
        })
    }
}
