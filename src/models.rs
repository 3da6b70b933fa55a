use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Withdraw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blog {
    pub id: Id,
    pub owner_id: String,
    pub name: String,
    pub intro: String,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlog {
    pub owner_id: String,
    pub name: String,
    pub intro: String,
}

/// Account record. `id` is the login id and the identity carried in tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub nickname: String,
    pub greetings: Option<String>,
    pub profile_image: Option<String>,
    pub upload_key: Option<String>, // set when the profile image lives on a store we may clean up
    pub blog_id: Id,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub withdrawn_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub nickname: String,
}

/// Header data shown on every page for a signed-in user; this is what the
/// header cache stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserHeader {
    pub id: String,
    pub nickname: String,
    pub greetings: Option<String>,
    pub profile_image: Option<String>,
    pub blog_id: Id,
    pub blog_name: String,
    pub blog_intro: String,
}

impl UserHeader {
    pub fn from_parts(user: &User, blog: &Blog) -> Self {
        Self {
            id: user.id.clone(),
            nickname: user.nickname.clone(),
            greetings: user.greetings.clone(),
            profile_image: user.profile_image.clone(),
            blog_id: blog.id,
            blog_name: blog.name.clone(),
            blog_intro: blog.intro.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id,
    pub blog_id: Id,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub blog_id: Id,
    pub title: String,
    pub body: String,
}

/// Who wrote a comment. Identified authors carry `user_id`; anonymous ones
/// only a nickname and a salted password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentAuthor {
    pub user_id: Option<String>,
    pub nickname: String,
    pub profile_image: Option<String>,
    pub password_hash: Option<String>,
    /// Author owned the post's blog at registration time.
    pub blog_owner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub body: String,
    pub image: Option<String>,
    pub author: CommentAuthor,
    pub secret: bool,
    pub anonymous: bool,
    pub parent_id: Option<Id>,
    pub target_user_id: Option<String>,
    pub target_nickname: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: Id,
    pub body: String,
    pub image: Option<String>,
    pub author: CommentAuthor,
    pub secret: bool,
    pub anonymous: bool,
    pub parent_id: Option<Id>,
    pub target_user_id: Option<String>,
    pub target_nickname: Option<String>,
}

/// Comment submission as received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentInput {
    pub post_id: Id,
    pub body: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub parent_comment_id: Option<Id>,
    #[serde(default)]
    pub target_user_id: Option<String>,
    #[serde(default)]
    pub target_user_nickname: Option<String>,
}

/// Assembled, viewer-specific rendering of a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: Id,
    pub body: String,
    pub image: Option<String>,
    pub author_id: Option<String>,
    pub author_nickname: String,
    pub author_avatar: Option<String>,
    pub author_is_blog_owner: bool,
    pub is_owner: bool,
    pub secret: bool,
    pub anonymous: bool,
    pub target_user_id: Option<String>,
    pub target_nickname: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies: Option<Vec<CommentView>>,
}
