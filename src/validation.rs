//! Checks applied to a comment submission before anything is persisted.

use crate::error::{ApiError, ErrorCode};
use crate::models::CommentInput;

pub const MAX_FIELD_LEN: usize = 255;
pub const MAX_COMMENT_LEN: usize = 3000;
pub const MAX_TITLE_LEN: usize = 128;

/// Present, not blank, and at most `max` characters.
pub fn field_ok<S: AsRef<str>>(value: Option<S>, max: usize) -> bool {
    value.is_some_and(|v| {
        let v = v.as_ref();
        !v.trim().is_empty() && v.chars().count() <= max
    })
}

/// Validates `input` for a viewer who is (`signed_in`) or is not logged in.
///
/// Rules run in a fixed order and the first failure wins:
/// 1. anonymous comments need a nickname and password
/// 2. replies need the replied-to author's id and nickname
/// 3. non-anonymous comments need a signed-in viewer
/// 4. anonymous comments cannot be secret
///
/// The body itself is checked last.
pub fn validate_comment(input: &CommentInput, signed_in: bool) -> Result<(), ApiError> {
    if input.anonymous
        && (!field_ok(input.nickname.as_deref(), MAX_FIELD_LEN)
            || !field_ok(input.password.as_deref(), MAX_FIELD_LEN))
    {
        return Err(ApiError::Validation(ErrorCode::NotValidFormInput));
    }

    if input.parent_comment_id.is_some()
        && (!field_ok(input.target_user_id.as_deref(), MAX_FIELD_LEN)
            || !field_ok(input.target_user_nickname.as_deref(), MAX_FIELD_LEN))
    {
        return Err(ApiError::Validation(ErrorCode::NotValidFormInput));
    }

    if !signed_in && !input.anonymous {
        return Err(ApiError::Auth(ErrorCode::NotLoginAnonymousComment));
    }

    if input.anonymous && input.secret {
        return Err(ApiError::Validation(ErrorCode::NotSecretWhenAnonymous));
    }

    if !field_ok(Some(&input.body), MAX_COMMENT_LEN) {
        return Err(ApiError::Validation(ErrorCode::NotValidFormInput));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymous() -> CommentInput {
        CommentInput {
            post_id: 1,
            body: "hi".into(),
            anonymous: true,
            nickname: Some("abc".into()),
            password: Some("pw".into()),
            ..Default::default()
        }
    }

    fn code(r: Result<(), ApiError>) -> ErrorCode {
        r.unwrap_err().code()
    }

    #[test]
    fn anonymous_secret_is_rejected() {
        let mut input = anonymous();
        input.secret = true;
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotSecretWhenAnonymous);
        assert_eq!(code(validate_comment(&input, true)), ErrorCode::NotSecretWhenAnonymous);

        input.body = String::new();
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotSecretWhenAnonymous);
    }

    #[test]
    fn identified_comment_requires_login() {
        let input = CommentInput { post_id: 1, body: "hi".into(), secret: true, ..Default::default() };
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotLoginAnonymousComment);
        assert!(validate_comment(&input, true).is_ok());
    }

    #[test]
    fn anonymous_needs_nickname_and_password() {
        let mut input = anonymous();
        input.password = None;
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotValidFormInput);

        let mut input = anonymous();
        input.nickname = Some("x".repeat(256));
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotValidFormInput);

        let mut input = anonymous();
        input.nickname = Some("   ".into());
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotValidFormInput);

        let mut input = anonymous();
        input.nickname = Some("x".repeat(255));
        assert!(validate_comment(&input, false).is_ok());
    }

    #[test]
    fn replies_need_a_target() {
        let mut input = anonymous();
        input.parent_comment_id = Some(4);
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotValidFormInput);

        input.target_user_id = Some("alice".into());
        input.target_user_nickname = Some("Alice".into());
        assert!(validate_comment(&input, false).is_ok());
    }

    #[test]
    fn form_errors_win_over_auth_errors() {
        // rule 2 fires before rule 3
        let input = CommentInput { post_id: 1, body: "hi".into(), parent_comment_id: Some(1), ..Default::default() };
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotValidFormInput);
    }

    #[test]
    fn body_is_required() {
        let mut input = anonymous();
        input.body = " ".into();
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotValidFormInput);
        input.body = "x".repeat(MAX_COMMENT_LEN + 1);
        assert_eq!(code(validate_comment(&input, false)), ErrorCode::NotValidFormInput);
    }
}
