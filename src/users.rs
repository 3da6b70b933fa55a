//! Account operations and the header cache they keep current.
//!
//! Every mutation below ends with an explicit `put` or `invalidate` on the
//! header cache; reads go through [`UserService::find_user_header`].

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::{hash_password, verify_password};
use crate::cache::HeaderCache;
use crate::counters::{LikeStore, ViewStore};
use crate::error::{ApiError, ErrorCode};
use crate::models::{Blog, NewBlog, NewUser, User, UserHeader, UserStatus};
use crate::repo::{RepoError, Repo};
use crate::storage::{ImageFile, ImageStoreError, ImageStores, UploadTarget};
use crate::validation::{field_ok, MAX_FIELD_LEN};

pub const PROFILE_IMAGE_PREFIX: &str = "profile";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpInput {
    pub id: String,
    pub email: String,
    pub password: String,
    pub nickname: String,
    #[serde(default)]
    pub blog_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicInfoInput {
    pub nickname: Option<String>,
    pub greetings: Option<String>,
    pub blog_name: Option<String>,
    pub blog_intro: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawInput {
    pub password: String,
}

#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn Repo>,
    cache: Arc<dyn HeaderCache>,
    likes: Arc<dyn LikeStore>,
    views: Arc<dyn ViewStore>,
    images: ImageStores,
    file_server_base: String,
}

fn form_error() -> ApiError {
    ApiError::Validation(ErrorCode::NotValidFormInput)
}

impl UserService {
    pub fn new(
        repo: Arc<dyn Repo>,
        cache: Arc<dyn HeaderCache>,
        likes: Arc<dyn LikeStore>,
        views: Arc<dyn ViewStore>,
        images: ImageStores,
        file_server_base: impl Into<String>,
    ) -> Self {
        Self { repo, cache, likes, views, images, file_server_base: file_server_base.into() }
    }

    async fn user(&self, id: &str) -> Result<User, ApiError> {
        self.repo.get_user(id).await.map_err(ApiError::not_found_as(ErrorCode::UserNotFound))
    }

    async fn blog_of(&self, user: &User) -> Result<Blog, ApiError> {
        self.repo.get_blog(user.blog_id).await.map_err(ApiError::not_found_as(ErrorCode::BlogNotFound))
    }

    /// Signed-in account `identity`, which must be `user_id` and active.
    async fn owned_account(&self, identity: &str, user_id: &str) -> Result<User, ApiError> {
        if identity != user_id {
            return Err(ApiError::Auth(ErrorCode::MismatchId));
        }
        let user = self.user(user_id).await?;
        if user.status != UserStatus::Active {
            return Err(ApiError::Auth(ErrorCode::NotActiveAccount));
        }
        Ok(user)
    }

    async fn refresh_header(&self, user: &User) -> Result<UserHeader, ApiError> {
        let blog = self.blog_of(user).await?;
        let header = UserHeader::from_parts(user, &blog);
        self.cache.put(&user.id, header.clone()).await;
        Ok(header)
    }

    /// Deletes an image we no longer reference. Failures are logged only.
    async fn discard_image(&self, src: &str) {
        let store = self.images.owner_of(src, &self.file_server_base);
        match store.delete(src).await {
            Ok(()) => info!(src, "deleted previous profile image"),
            Err(e) => warn!(src, error = %e, "could not delete previous profile image"),
        }
    }

    pub async fn sign_up(&self, input: SignUpInput) -> Result<UserHeader, ApiError> {
        let id = input.id.trim().to_string();
        let email = input.email.trim().to_lowercase();
        if !field_ok(Some(&id), MAX_FIELD_LEN)
            || !field_ok(Some(&input.nickname), MAX_FIELD_LEN)
            || !field_ok(Some(&input.password), MAX_FIELD_LEN)
            || !field_ok(Some(&email), MAX_FIELD_LEN)
            || !email.contains('@')
        {
            return Err(form_error());
        }
        if self.repo.email_exists(&email).await? {
            return Err(ApiError::Conflict(ErrorCode::AlreadySameEmail));
        }
        if self.repo.user_id_exists(&id).await? {
            return Err(ApiError::Conflict(ErrorCode::AlreadySameId));
        }

        let blog_name = input
            .blog_name
            .filter(|n| field_ok(Some(n), MAX_FIELD_LEN))
            .unwrap_or_else(|| format!("{}'s blog", input.nickname.trim()));
        let new_user = NewUser {
            id: id.clone(),
            email,
            password_hash: hash_password(&input.password)?,
            nickname: input.nickname.trim().to_string(),
        };
        let new_blog = NewBlog { owner_id: id, name: blog_name, intro: String::new() };
        let (user, blog) = self.repo.create_account(new_user, new_blog).await.map_err(|e| match e {
            // lost a race with a concurrent sign-up
            RepoError::Conflict => ApiError::Conflict(ErrorCode::AlreadySameId),
            other => other.into(),
        })?;
        info!(user_id = %user.id, blog_id = blog.id, "account created");
        Ok(UserHeader::from_parts(&user, &blog))
    }

    /// Cache-aside read of the signed-in user's header.
    pub async fn find_user_header(&self, identity: &str) -> Result<UserHeader, ApiError> {
        if let Some(header) = self.cache.get(identity).await {
            return Ok(header);
        }
        let user = self.user(identity).await?;
        if user.status != UserStatus::Active {
            return Err(ApiError::Auth(ErrorCode::NotActiveAccount));
        }
        self.refresh_header(&user).await
    }

    pub async fn update_basic_info(&self, identity: &str, input: BasicInfoInput) -> Result<UserHeader, ApiError> {
        let mut user = self.owned_account(identity, identity).await?;
        let mut blog = self.blog_of(&user).await?;

        if let Some(nickname) = input.nickname {
            if !field_ok(Some(&nickname), MAX_FIELD_LEN) {
                return Err(form_error());
            }
            user.nickname = nickname.trim().to_string();
        }
        if let Some(greetings) = input.greetings {
            if greetings.chars().count() > MAX_FIELD_LEN {
                return Err(form_error());
            }
            user.greetings = Some(greetings).filter(|g| !g.trim().is_empty());
        }
        if let Some(name) = input.blog_name {
            if !field_ok(Some(&name), MAX_FIELD_LEN) {
                return Err(form_error());
            }
            blog.name = name.trim().to_string();
        }
        if let Some(intro) = input.blog_intro {
            if intro.chars().count() > MAX_FIELD_LEN {
                return Err(form_error());
            }
            blog.intro = intro;
        }

        self.repo.save_user(&user).await?;
        self.repo.save_blog(&blog).await?;
        let header = UserHeader::from_parts(&user, &blog);
        self.cache.put(identity, header.clone()).await;
        Ok(header)
    }

    pub async fn upload_profile_image(
        &self,
        identity: &str,
        user_id: &str,
        bytes: Vec<u8>,
        target: UploadTarget,
        upload_key: Option<String>,
    ) -> Result<UserHeader, ApiError> {
        let mut user = self.owned_account(identity, user_id).await?;
        let file = ImageFile::from_bytes(bytes)?;
        let key = file.key(PROFILE_IMAGE_PREFIX);
        let store = self.images.for_target(target);
        let src = match store.upload(&key, &file.mime, &file.bytes).await {
            Ok(src) => src,
            Err(ImageStoreError::Duplicate) => store.public_src(&key),
            Err(e) => return Err(ApiError::Internal(format!("profile image upload failed: {e}"))),
        };

        let had_upload = user.upload_key.as_deref().is_some_and(|k| !k.is_empty());
        if had_upload {
            if let Some(old) = user.profile_image.as_deref().filter(|old| *old != src) {
                self.discard_image(old).await;
            }
        }

        user.profile_image = Some(src);
        user.upload_key = Some(upload_key.filter(|k| !k.trim().is_empty()).unwrap_or(file.hash));
        self.repo.save_user(&user).await?;
        metrics::counter!("profile_images_uploaded_total").increment(1);
        self.refresh_header(&user).await
    }

    pub async fn remove_profile_image(&self, identity: &str, user_id: &str) -> Result<UserHeader, ApiError> {
        let mut user = self.owned_account(identity, user_id).await?;
        if let Some(old) = user.profile_image.take() {
            self.discard_image(&old).await;
        }
        user.upload_key = None;
        self.repo.save_user(&user).await?;
        self.refresh_header(&user).await
    }

    pub async fn withdraw(&self, identity: &str, user_id: &str, input: WithdrawInput) -> Result<(), ApiError> {
        let mut user = self.user(user_id).await?;
        if identity != user.id {
            return Err(ApiError::Auth(ErrorCode::MismatchId));
        }
        if !verify_password(&input.password, &user.password_hash) {
            return Err(ApiError::Auth(ErrorCode::MismatchPassword));
        }
        if user.status != UserStatus::Active {
            return Err(ApiError::Auth(ErrorCode::NotActiveAccount));
        }
        let mut blog = self.blog_of(&user).await?;
        if blog.deleted {
            return Err(ApiError::Conflict(ErrorCode::AlreadyDeleteBlog));
        }

        user.status = UserStatus::Withdraw;
        user.withdrawn_at = Some(Utc::now());
        blog.deleted = true;
        self.repo.save_user(&user).await?;
        self.repo.save_blog(&blog).await?;

        self.likes.purge_user(&user.id, blog.id).await;
        self.views.purge_blog(blog.id).await;
        self.cache.invalidate(identity).await;
        info!(user_id = %user.id, blog_id = blog.id, "account withdrawn");
        Ok(())
    }
}
