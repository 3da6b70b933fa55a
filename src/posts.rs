use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::counters::{visitor_key, BlogVisits, LikeStore, LikedPost, ViewStore};
use crate::error::{ApiError, ErrorCode};
use crate::models::{Blog, Id, NewPost, Post, User};
use crate::repo::{Repo, RepoError};
use crate::validation::{field_ok, MAX_TITLE_LEN};

#[derive(Debug, Clone, Deserialize)]
pub struct PostInput {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeSummary {
    pub post_id: Id,
    pub count: u64,
    pub liked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSummary {
    pub post_id: Id,
    pub post_views: u64,
    pub blog_today: u64,
    pub blog_total: u64,
}

#[derive(Clone)]
pub struct PostService {
    repo: Arc<dyn Repo>,
    likes: Arc<dyn LikeStore>,
    views: Arc<dyn ViewStore>,
}

impl PostService {
    pub fn new(repo: Arc<dyn Repo>, likes: Arc<dyn LikeStore>, views: Arc<dyn ViewStore>) -> Self {
        Self { repo, likes, views }
    }

    /// Publishes on the author's own blog.
    pub async fn create_post(&self, author: &User, input: PostInput) -> Result<Post, ApiError> {
        if !field_ok(Some(&input.title), MAX_TITLE_LEN) || input.body.trim().is_empty() {
            return Err(ApiError::Validation(ErrorCode::NotValidFormInput));
        }
        let new = NewPost { blog_id: author.blog_id, title: input.title.trim().to_string(), body: input.body };
        let post = self
            .repo
            .create_post(new)
            .await
            .map_err(ApiError::not_found_as(ErrorCode::BlogNotFound))?;
        tracing::info!(post_id = post.id, blog_id = post.blog_id, "post created");
        Ok(post)
    }

    pub async fn get_post(&self, id: Id) -> Result<Post, ApiError> {
        self.repo.get_post(id).await.map_err(ApiError::not_found_as(ErrorCode::PostNotFound))
    }

    async fn live_blog(&self, blog_id: Id) -> Result<Blog, ApiError> {
        let blog = self
            .repo
            .get_blog(blog_id)
            .await
            .map_err(ApiError::not_found_as(ErrorCode::BlogNotFound))?;
        if blog.deleted {
            return Err(ApiError::NotFound(ErrorCode::BlogNotFound));
        }
        Ok(blog)
    }

    pub async fn list_posts(&self, blog_id: Id) -> Result<Vec<Post>, ApiError> {
        self.live_blog(blog_id).await?;
        Ok(self.repo.list_posts(blog_id).await?)
    }

    pub async fn like(&self, post_id: Id, user_id: &str) -> Result<LikeSummary, ApiError> {
        let post = self.get_post(post_id).await?;
        let count = self.likes.like(LikedPost { post_id, blog_id: post.blog_id }, user_id).await;
        Ok(LikeSummary { post_id, count, liked: true })
    }

    pub async fn unlike(&self, post_id: Id, user_id: &str) -> Result<LikeSummary, ApiError> {
        self.get_post(post_id).await?;
        let count = self.likes.unlike(post_id, user_id).await;
        Ok(LikeSummary { post_id, count, liked: false })
    }

    pub async fn like_summary(&self, post_id: Id, viewer: Option<&str>) -> Result<LikeSummary, ApiError> {
        self.get_post(post_id).await?;
        let liked = match viewer {
            Some(user_id) => self.likes.has_liked(post_id, user_id).await,
            None => false,
        };
        Ok(LikeSummary { post_id, count: self.likes.like_count(post_id).await, liked })
    }

    /// Posts `user_id` liked that are still readable, in the order they were liked.
    pub async fn liked_posts(&self, user_id: &str) -> Result<Vec<Post>, ApiError> {
        let mut posts = Vec::new();
        for liked in self.likes.liked_posts(user_id).await {
            match self.repo.get_post(liked.post_id).await {
                Ok(post) => posts.push(post),
                Err(RepoError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(posts)
    }

    pub async fn blog_visits(&self, blog_id: Id) -> Result<BlogVisits, ApiError> {
        self.live_blog(blog_id).await?;
        Ok(self.views.blog_visits(blog_id, Utc::now().date_naive()).await)
    }

    /// Counts a read of the post and a visit to its blog by `visitor`.
    pub async fn record_view(&self, post_id: Id, visitor: &str) -> Result<ViewSummary, ApiError> {
        let post = self.get_post(post_id).await?;
        let post_views = self.views.record_post_view(post.blog_id, post_id).await;
        let key = visitor_key(post.blog_id, visitor);
        let visits = self.views.record_blog_visit(post.blog_id, &key, Utc::now().date_naive()).await;
        Ok(ViewSummary { post_id, post_views, blog_today: visits.today, blog_total: visits.total })
    }
}
