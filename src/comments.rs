//! Comment listing, registration and the per-comment reads built on them.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::assembler::{assemble, render, CommentPage};
use crate::auth::{hash_password, verify_password};
use crate::error::{ApiError, ErrorCode};
use crate::models::{Comment, CommentAuthor, CommentInput, CommentView, Id, NewComment, Post};
use crate::pagination::{PageRequest, PagingConfig};
use crate::repo::Repo;
use crate::storage::{ImageFile, ImageStore};
use crate::validation::validate_comment;
use crate::visibility::{ViewerContext, ViewerIdentity};

pub const COMMENT_IMAGE_PREFIX: &str = "comments";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredComment {
    pub id: Id,
    /// Top-level comments on the post after the insert.
    pub comment_count: u64,
}

#[derive(Clone)]
pub struct CommentService {
    repo: Arc<dyn Repo>,
    images: Arc<dyn ImageStore>,
    paging: PagingConfig,
}

impl CommentService {
    pub fn new(repo: Arc<dyn Repo>, images: Arc<dyn ImageStore>, paging: PagingConfig) -> Self {
        Self { repo, images, paging }
    }

    async fn live_post(&self, post_id: Id) -> Result<Post, ApiError> {
        self.repo
            .get_post(post_id)
            .await
            .map_err(ApiError::not_found_as(ErrorCode::PostNotFound))
    }

    /// One page of a post's comments as seen by `viewer`.
    ///
    /// `blog_id`, when given, must name the blog the post belongs to; the
    /// ownership check always runs against the post's own blog.
    pub async fn list_comments(
        &self,
        post_id: Id,
        blog_id: Option<Id>,
        req: &PageRequest,
        viewer: Option<ViewerIdentity>,
    ) -> Result<CommentPage, ApiError> {
        let post = self.live_post(post_id).await?;
        if blog_id.is_some_and(|b| b != post.blog_id) {
            return Err(ApiError::NotFound(ErrorCode::PostNotFound));
        }
        let viewer = ViewerContext::for_blog(viewer, post.blog_id);

        let total = self.repo.count_top_level_comments(post_id).await?;
        let window = self.paging.window(total, req);
        let raw = if window.is_empty() {
            Vec::new()
        } else {
            self.repo.fetch_comments_window(post_id, window.offset, window.limit).await?
        };
        debug!(post_id, page = window.page, fetched = raw.len(), "assembling comment page");
        Ok(assemble(raw, &viewer, window))
    }

    pub async fn register_comment(
        &self,
        input: CommentInput,
        viewer: Option<ViewerIdentity>,
    ) -> Result<RegisteredComment, ApiError> {
        if let Err(e) = validate_comment(&input, viewer.is_some()) {
            metrics::counter!("comment_registrations_rejected_total", "code" => e.code().as_str()).increment(1);
            return Err(e);
        }
        let post = self.live_post(input.post_id).await?;

        // Replies hang off top-level comments only.
        let parent_id = match input.parent_comment_id {
            Some(pid) => {
                let parent = self
                    .repo
                    .get_comment(pid)
                    .await
                    .map_err(ApiError::not_found_as(ErrorCode::CommentNotFound))?;
                if parent.post_id != post.id {
                    return Err(ApiError::NotFound(ErrorCode::CommentNotFound));
                }
                Some(parent.parent_id.unwrap_or(parent.id))
            }
            None => None,
        };

        let author = self.author_for(&input, viewer.as_ref(), &post).await?;
        let new = NewComment {
            post_id: post.id,
            body: input.body,
            image: input.image.filter(|s| !s.trim().is_empty()),
            author,
            secret: input.secret,
            anonymous: input.anonymous,
            parent_id,
            target_user_id: parent_id.and(input.target_user_id),
            target_nickname: parent_id.and(input.target_user_nickname),
        };
        let id = self.repo.insert_comment(new).await.map_err(|e| match e {
            crate::repo::RepoError::NotFound if parent_id.is_some() => ApiError::NotFound(ErrorCode::CommentNotFound),
            crate::repo::RepoError::NotFound => ApiError::NotFound(ErrorCode::PostNotFound),
            other => other.into(),
        })?;
        let comment_count = self.repo.count_top_level_comments(post.id).await?;

        metrics::counter!("comments_registered_total").increment(1);
        info!(comment_id = id, post_id = post.id, anonymous = input.anonymous, "comment registered");
        Ok(RegisteredComment { id, comment_count })
    }

    async fn author_for(
        &self,
        input: &CommentInput,
        viewer: Option<&ViewerIdentity>,
        post: &Post,
    ) -> Result<CommentAuthor, ApiError> {
        match (input.anonymous, viewer) {
            (false, Some(v)) => {
                let user = self
                    .repo
                    .get_user(&v.user_id)
                    .await
                    .map_err(ApiError::not_found_as(ErrorCode::UserNotFound))?;
                Ok(CommentAuthor {
                    password_hash: Some(hash_password(&user.password_hash)?),
                    blog_owner: post.blog_id == user.blog_id,
                    user_id: Some(user.id),
                    nickname: user.nickname,
                    profile_image: user.profile_image,
                })
            }
            (true, _) => {
                let nickname = input.nickname.clone().unwrap_or_default();
                let password = input.password.as_deref().unwrap_or_default();
                Ok(CommentAuthor {
                    user_id: None,
                    nickname: nickname.trim().to_string(),
                    profile_image: None,
                    password_hash: Some(hash_password(password)?),
                    blog_owner: false,
                })
            }
            (false, None) => Err(ApiError::Auth(ErrorCode::NotLoginAnonymousComment)),
        }
    }

    async fn comment_on_live_post(&self, id: Id) -> Result<(Comment, Post), ApiError> {
        let comment = self
            .repo
            .get_comment(id)
            .await
            .map_err(ApiError::not_found_as(ErrorCode::CommentNotFound))?;
        let post = self.live_post(comment.post_id).await?;
        Ok((comment, post))
    }

    /// A single comment, redacted by the same rules as the listing.
    pub async fn find_comment(&self, id: Id, viewer: Option<ViewerIdentity>) -> Result<CommentView, ApiError> {
        let (comment, post) = self.comment_on_live_post(id).await?;
        Ok(render(&comment, &ViewerContext::for_blog(viewer, post.blog_id)))
    }

    /// Reveals an anonymous comment to whoever knows its password.
    pub async fn unlock_comment(&self, id: Id, password: &str) -> Result<CommentView, ApiError> {
        let (comment, _) = self.comment_on_live_post(id).await?;
        let hash = match (&comment.author.password_hash, comment.anonymous) {
            (Some(hash), true) => hash,
            _ => return Err(ApiError::Auth(ErrorCode::MismatchPassword)),
        };
        if !verify_password(password, hash) {
            return Err(ApiError::Auth(ErrorCode::MismatchPassword));
        }
        let mut view = render(&comment, &ViewerContext::anonymous());
        view.body = comment.body;
        view.image = comment.image;
        Ok(view)
    }

    /// Stores a comment thumbnail and returns its public source.
    pub async fn upload_comment_image(&self, bytes: Vec<u8>) -> Result<String, ApiError> {
        let file = ImageFile::from_bytes(bytes)?;
        let key = file.key(COMMENT_IMAGE_PREFIX);
        match self.images.upload(&key, &file.mime, &file.bytes).await {
            Ok(src) => Ok(src),
            // same bytes already stored under the same content key
            Err(crate::storage::ImageStoreError::Duplicate) => Ok(self.images.public_src(&key)),
            Err(e) => Err(ApiError::Internal(format!("comment image upload failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBlog, NewPost, NewUser};
    use crate::repo::inmem::InMemRepo;
    use crate::repo::{AccountRepo, PostRepo};
    use crate::storage::ImageStoreError;
    use crate::visibility::SECRET_COMMENT_MARKER;
    use async_trait::async_trait;

    struct NoImages;

    #[async_trait]
    impl ImageStore for NoImages {
        async fn upload(&self, key: &str, _mime: &str, _bytes: &[u8]) -> Result<String, ImageStoreError> {
            Ok(self.public_src(key))
        }
        async fn delete(&self, _src: &str) -> Result<(), ImageStoreError> {
            Ok(())
        }
        fn public_src(&self, key: &str) -> String {
            format!("mem://{key}")
        }
    }

    struct Fixture {
        svc: CommentService,
        post: Post,
        owner: ViewerIdentity,
        alice: ViewerIdentity,
    }

    async fn account(repo: &InMemRepo, id: &str) -> ViewerIdentity {
        let (user, blog) = repo
            .create_account(
                NewUser { id: id.into(), email: format!("{id}@test"), password_hash: "x".into(), nickname: id.into() },
                NewBlog { owner_id: id.into(), name: format!("{id}'s blog"), intro: String::new() },
            )
            .await
            .unwrap();
        ViewerIdentity { user_id: user.id, blog_id: blog.id }
    }

    async fn fixture() -> Fixture {
        let repo = InMemRepo::new();
        let owner = account(&repo, "owner").await;
        let alice = account(&repo, "alice").await;
        let post = repo
            .create_post(NewPost { blog_id: owner.blog_id, title: "t".into(), body: "b".into() })
            .await
            .unwrap();
        let svc = CommentService::new(Arc::new(repo), Arc::new(NoImages), PagingConfig::default());
        Fixture { svc, post, owner, alice }
    }

    fn input(post_id: Id, body: &str) -> CommentInput {
        CommentInput { post_id, body: body.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn author_sees_own_secret_comment() {
        let f = fixture().await;
        let mut secret = input(f.post.id, "only us");
        secret.secret = true;
        f.svc.register_comment(secret, Some(f.alice.clone())).await.unwrap();

        let page = f.svc.list_comments(f.post.id, None, &PageRequest::default(), Some(f.alice.clone())).await.unwrap();
        assert_eq!(page.comments[0].body, "only us");
        assert!(page.comments[0].is_owner);

        let page = f.svc.list_comments(f.post.id, None, &PageRequest::default(), Some(f.owner.clone())).await.unwrap();
        assert_eq!(page.comments[0].body, "only us");
        assert!(!page.comments[0].is_owner);

        let page = f.svc.list_comments(f.post.id, None, &PageRequest::default(), None).await.unwrap();
        assert_eq!(page.comments[0].body, SECRET_COMMENT_MARKER);
    }

    #[tokio::test]
    async fn blog_owner_flag_is_recorded() {
        let f = fixture().await;
        f.svc.register_comment(input(f.post.id, "mine"), Some(f.owner.clone())).await.unwrap();
        f.svc.register_comment(input(f.post.id, "theirs"), Some(f.alice.clone())).await.unwrap();
        let page = f.svc.list_comments(f.post.id, None, &PageRequest::default(), None).await.unwrap();
        let flags: Vec<_> = page.comments.iter().map(|c| (c.body.as_str(), c.author_is_blog_owner)).collect();
        assert_eq!(flags, vec![("theirs", false), ("mine", true)]);
    }

    #[tokio::test]
    async fn replies_to_replies_attach_to_the_top_level() {
        let f = fixture().await;
        let root = f.svc.register_comment(input(f.post.id, "root"), Some(f.owner.clone())).await.unwrap();
        let mut reply = input(f.post.id, "reply");
        reply.parent_comment_id = Some(root.id);
        reply.target_user_id = Some("owner".into());
        reply.target_user_nickname = Some("owner".into());
        let r1 = f.svc.register_comment(reply.clone(), Some(f.alice.clone())).await.unwrap();
        assert_eq!(r1.comment_count, 1);

        reply.parent_comment_id = Some(r1.id);
        reply.body = "nested".into();
        reply.target_user_id = Some("alice".into());
        f.svc.register_comment(reply, Some(f.owner.clone())).await.unwrap();

        let page = f.svc.list_comments(f.post.id, None, &PageRequest::default(), None).await.unwrap();
        assert_eq!(page.pagination.total_count, 1);
        let replies = page.comments[0].replies.as_ref().unwrap();
        let bodies: Vec<_> = replies.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies, vec!["reply", "nested"]);
        assert_eq!(replies[1].target_user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn missing_parent_and_post_are_not_found() {
        let f = fixture().await;
        let mut reply = input(f.post.id, "reply");
        reply.parent_comment_id = Some(9999);
        reply.target_user_id = Some("x".into());
        reply.target_user_nickname = Some("x".into());
        let err = f.svc.register_comment(reply, Some(f.alice.clone())).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommentNotFound);

        let err = f.svc.register_comment(input(9999, "x"), Some(f.alice.clone())).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PostNotFound);

        let err = f.svc.list_comments(f.post.id, Some(f.alice.blog_id), &PageRequest::default(), None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PostNotFound);
    }

    #[tokio::test]
    async fn anonymous_comment_unlocks_with_its_password() {
        let f = fixture().await;
        let mut anon = input(f.post.id, "hello");
        anon.anonymous = true;
        anon.nickname = Some(" guest ".into());
        anon.password = Some("pw".into());
        let c = f.svc.register_comment(anon, None).await.unwrap();

        let view = f.svc.find_comment(c.id, None).await.unwrap();
        assert_eq!(view.author_nickname, "guest");
        assert!(view.author_id.is_none());

        assert_eq!(f.svc.unlock_comment(c.id, "pw").await.unwrap().body, "hello");
        assert_eq!(f.svc.unlock_comment(c.id, "nope").await.unwrap_err().code(), ErrorCode::MismatchPassword);
    }

    #[tokio::test]
    async fn identified_comments_cannot_be_unlocked() {
        let f = fixture().await;
        let c = f.svc.register_comment(input(f.post.id, "hi"), Some(f.alice.clone())).await.unwrap();
        assert_eq!(f.svc.unlock_comment(c.id, "x").await.unwrap_err().code(), ErrorCode::MismatchPassword);
    }

    #[tokio::test]
    async fn empty_post_lists_nothing() {
        let f = fixture().await;
        let req = PageRequest { page: Some(3), page_size: Some(5) };
        let page = f.svc.list_comments(f.post.id, Some(f.owner.blog_id), &req, None).await.unwrap();
        assert!(page.comments.is_empty());
        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.pagination.total_pages, 0);
    }
}
