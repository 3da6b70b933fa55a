use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("storage failure: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait AccountRepo: Send + Sync {
    /// Creates the user together with their blog.
    async fn create_account(&self, user: NewUser, blog: NewBlog) -> RepoResult<(User, Blog)>;
    async fn get_user(&self, id: &str) -> RepoResult<User>;
    async fn user_id_exists(&self, id: &str) -> RepoResult<bool>;
    async fn email_exists(&self, email: &str) -> RepoResult<bool>;
    async fn save_user(&self, user: &User) -> RepoResult<()>;
    async fn get_blog(&self, id: Id) -> RepoResult<Blog>;
    async fn save_blog(&self, blog: &Blog) -> RepoResult<()>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    /// Live post by id; soft-deleted posts and posts of deleted blogs are `NotFound`.
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    /// Newest first.
    async fn list_posts(&self, blog_id: Id) -> RepoResult<Vec<Post>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn count_top_level_comments(&self, post_id: Id) -> RepoResult<u64>;
    /// Top-level comments `offset..offset+limit` newest first, followed by
    /// every reply to them.
    async fn fetch_comments_window(&self, post_id: Id, offset: u64, limit: u64) -> RepoResult<Vec<Comment>>;
    async fn insert_comment(&self, new: NewComment) -> RepoResult<Id>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
}

pub trait Repo: AccountRepo + PostRepo + CommentRepo {}

impl<T> Repo for T where T: AccountRepo + PostRepo + CommentRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tracing::{info, warn};

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        blogs: HashMap<Id, Blog>,
        users: HashMap<String, User>,
        posts: HashMap<Id, Post>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn live_post(&self, id: Id) -> Option<&Post> {
            self.posts
                .get(&id)
                .filter(|p| !p.deleted && self.blogs.get(&p.blog_id).is_some_and(|b| !b.deleted))
        }
    }

    /// Process-local store, optionally snapshotted to `<data dir>/state.json`
    /// after every write.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Store backed by a snapshot under `data_dir`, loaded if present.
        pub fn with_snapshot(data_dir: impl AsRef<Path>) -> Self {
            let path = data_dir.as_ref().join("state.json");
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
        }

        /// Store that never touches disk.
        pub fn new() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    info!("no snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self, state: &State) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            match serde_json::to_vec_pretty(state) {
                Ok(bytes) => {
                    if let Some(dir) = path.parent() {
                        let _ = std::fs::create_dir_all(dir);
                    }
                    if let Err(e) = std::fs::write(path, bytes) {
                        warn!("failed to write snapshot '{}': {e}", path.display());
                    }
                }
                Err(e) => warn!("failed to encode snapshot: {e}"),
            }
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl AccountRepo for InMemRepo {
        async fn create_account(&self, new_user: NewUser, new_blog: NewBlog) -> RepoResult<(User, Blog)> {
            let mut s = self.state.write().await;
            if s.users.contains_key(&new_user.id) || s.users.values().any(|u| u.email == new_user.email) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let blog = Blog {
                id: s.next_id(),
                owner_id: new_blog.owner_id,
                name: new_blog.name,
                intro: new_blog.intro,
                created_at: now,
                deleted: false,
            };
            let user = User {
                id: new_user.id,
                email: new_user.email,
                password_hash: new_user.password_hash,
                nickname: new_user.nickname,
                greetings: None,
                profile_image: None,
                upload_key: None,
                blog_id: blog.id,
                status: UserStatus::Active,
                created_at: now,
                withdrawn_at: None,
            };
            s.blogs.insert(blog.id, blog.clone());
            s.users.insert(user.id.clone(), user.clone());
            self.persist(&s);
            Ok((user, blog))
        }

        async fn get_user(&self, id: &str) -> RepoResult<User> {
            let s = self.state.read().await;
            s.users.get(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn user_id_exists(&self, id: &str) -> RepoResult<bool> {
            Ok(self.state.read().await.users.contains_key(id))
        }

        async fn email_exists(&self, email: &str) -> RepoResult<bool> {
            Ok(self.state.read().await.users.values().any(|u| u.email == email))
        }

        async fn save_user(&self, user: &User) -> RepoResult<()> {
            let mut s = self.state.write().await;
            let slot = s.users.get_mut(&user.id).ok_or(RepoError::NotFound)?;
            *slot = user.clone();
            self.persist(&s);
            Ok(())
        }

        async fn get_blog(&self, id: Id) -> RepoResult<Blog> {
            let s = self.state.read().await;
            s.blogs.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn save_blog(&self, blog: &Blog) -> RepoResult<()> {
            let mut s = self.state.write().await;
            let slot = s.blogs.get_mut(&blog.id).ok_or(RepoError::NotFound)?;
            *slot = blog.clone();
            self.persist(&s);
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut s = self.state.write().await;
            match s.blogs.get(&new.blog_id) {
                Some(b) if !b.deleted => {}
                _ => return Err(RepoError::NotFound),
            }
            let post = Post {
                id: s.next_id(),
                blog_id: new.blog_id,
                title: new.title,
                body: new.body,
                created_at: Utc::now(),
                deleted: false,
            };
            s.posts.insert(post.id, post.clone());
            self.persist(&s);
            Ok(post)
        }

        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let s = self.state.read().await;
            s.live_post(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_posts(&self, blog_id: Id) -> RepoResult<Vec<Post>> {
            let s = self.state.read().await;
            let mut v: Vec<_> = s.posts.values()
                .filter(|p| p.blog_id == blog_id && !p.deleted)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn count_top_level_comments(&self, post_id: Id) -> RepoResult<u64> {
            let s = self.state.read().await;
            Ok(s.comments.values().filter(|c| c.post_id == post_id && c.is_top_level()).count() as u64)
        }

        async fn fetch_comments_window(&self, post_id: Id, offset: u64, limit: u64) -> RepoResult<Vec<Comment>> {
            let s = self.state.read().await;
            let mut top: Vec<&Comment> = s.comments.values()
                .filter(|c| c.post_id == post_id && c.is_top_level())
                .collect();
            top.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            let page: Vec<Comment> = top.into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect();
            let parents: HashSet<Id> = page.iter().map(|c| c.id).collect();
            let replies = s.comments.values()
                .filter(|c| c.parent_id.is_some_and(|p| parents.contains(&p)))
                .cloned();
            Ok(page.iter().cloned().chain(replies).collect())
        }

        async fn insert_comment(&self, new: NewComment) -> RepoResult<Id> {
            let mut s = self.state.write().await;
            if s.live_post(new.post_id).is_none() {
                return Err(RepoError::NotFound);
            }
            if let Some(parent) = new.parent_id {
                if !s.comments.get(&parent).is_some_and(|c| c.post_id == new.post_id) {
                    return Err(RepoError::NotFound);
                }
            }
            let id = s.next_id();
            let comment = Comment {
                id,
                post_id: new.post_id,
                body: new.body,
                image: new.image,
                author: new.author,
                secret: new.secret,
                anonymous: new.anonymous,
                parent_id: new.parent_id,
                target_user_id: new.target_user_id,
                target_nickname: new.target_nickname,
                created_at: Utc::now(),
            };
            s.comments.insert(id, comment);
            self.persist(&s);
            Ok(id)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let s = self.state.read().await;
            s.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{Pool, Postgres};

    pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }

    #[derive(sqlx::FromRow)]
    struct UserRow {
        id: String,
        email: String,
        password_hash: String,
        nickname: String,
        greetings: Option<String>,
        profile_image: Option<String>,
        upload_key: Option<String>,
        blog_id: Id,
        status: String,
        created_at: DateTime<Utc>,
        withdrawn_at: Option<DateTime<Utc>>,
    }

    impl From<UserRow> for User {
        fn from(r: UserRow) -> Self {
            User {
                id: r.id,
                email: r.email,
                password_hash: r.password_hash,
                nickname: r.nickname,
                greetings: r.greetings,
                profile_image: r.profile_image,
                upload_key: r.upload_key,
                blog_id: r.blog_id,
                status: if r.status == "WITHDRAW" { UserStatus::Withdraw } else { UserStatus::Active },
                created_at: r.created_at,
                withdrawn_at: r.withdrawn_at,
            }
        }
    }

    fn status_str(s: UserStatus) -> &'static str {
        match s {
            UserStatus::Active => "ACTIVE",
            UserStatus::Withdraw => "WITHDRAW",
        }
    }

    #[derive(sqlx::FromRow)]
    struct BlogRow {
        id: Id,
        owner_id: String,
        name: String,
        intro: String,
        created_at: DateTime<Utc>,
        deleted: bool,
    }

    impl From<BlogRow> for Blog {
        fn from(r: BlogRow) -> Self {
            Blog { id: r.id, owner_id: r.owner_id, name: r.name, intro: r.intro, created_at: r.created_at, deleted: r.deleted }
        }
    }

    #[derive(sqlx::FromRow)]
    struct PostRow {
        id: Id,
        blog_id: Id,
        title: String,
        body: String,
        created_at: DateTime<Utc>,
        deleted: bool,
    }

    impl From<PostRow> for Post {
        fn from(r: PostRow) -> Self {
            Post { id: r.id, blog_id: r.blog_id, title: r.title, body: r.body, created_at: r.created_at, deleted: r.deleted }
        }
    }

    #[derive(sqlx::FromRow)]
    struct CommentRow {
        id: Id,
        post_id: Id,
        body: String,
        image: Option<String>,
        author_user_id: Option<String>,
        author_nickname: String,
        author_profile_image: Option<String>,
        author_password_hash: Option<String>,
        author_blog_owner: bool,
        secret: bool,
        anonymous: bool,
        parent_id: Option<Id>,
        target_user_id: Option<String>,
        target_nickname: Option<String>,
        created_at: DateTime<Utc>,
    }

    impl From<CommentRow> for Comment {
        fn from(r: CommentRow) -> Self {
            Comment {
                id: r.id,
                post_id: r.post_id,
                body: r.body,
                image: r.image,
                author: CommentAuthor {
                    user_id: r.author_user_id,
                    nickname: r.author_nickname,
                    profile_image: r.author_profile_image,
                    password_hash: r.author_password_hash,
                    blog_owner: r.author_blog_owner,
                },
                secret: r.secret,
                anonymous: r.anonymous,
                parent_id: r.parent_id,
                target_user_id: r.target_user_id,
                target_nickname: r.target_nickname,
                created_at: r.created_at,
            }
        }
    }

    const USER_COLUMNS: &str = "id, email, password_hash, nickname, greetings, profile_image, upload_key, blog_id, status, created_at, withdrawn_at";
    const COMMENT_COLUMNS: &str = "id, post_id, body, image, author_user_id, author_nickname, author_profile_image, \
        author_password_hash, author_blog_owner, secret, anonymous, parent_id, target_user_id, target_nickname, created_at";

    #[async_trait]
    impl AccountRepo for PgRepo {
        async fn create_account(&self, user: NewUser, blog: NewBlog) -> RepoResult<(User, Blog)> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let blog = sqlx::query_as::<_, BlogRow>(
                "INSERT INTO blogs (owner_id, name, intro) VALUES ($1,$2,$3) RETURNING id, owner_id, name, intro, created_at, deleted",
            )
            .bind(&blog.owner_id).bind(&blog.name).bind(&blog.intro)
            .fetch_one(&mut *tx).await.map_err(internal)?;
            let user = sqlx::query_as::<_, UserRow>(&format!(
                "INSERT INTO users (id, email, password_hash, nickname, blog_id, status) VALUES ($1,$2,$3,$4,$5,'ACTIVE') RETURNING {USER_COLUMNS}"
            ))
            .bind(&user.id).bind(&user.email).bind(&user.password_hash).bind(&user.nickname).bind(blog.id)
            .fetch_one(&mut *tx).await.map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            Ok((user.into(), blog.into()))
        }

        async fn get_user(&self, id: &str) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(row.into())
        }

        async fn user_id_exists(&self, id: &str) -> RepoResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(internal)
        }

        async fn email_exists(&self, email: &str) -> RepoResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool).await.map_err(internal)
        }

        async fn save_user(&self, user: &User) -> RepoResult<()> {
            let done = sqlx::query(
                "UPDATE users SET nickname=$2, greetings=$3, profile_image=$4, upload_key=$5, status=$6, withdrawn_at=$7, password_hash=$8 WHERE id=$1",
            )
            .bind(&user.id)
            .bind(&user.nickname)
            .bind(user.greetings.as_ref())
            .bind(user.profile_image.as_ref())
            .bind(user.upload_key.as_ref())
            .bind(status_str(user.status))
            .bind(user.withdrawn_at)
            .bind(&user.password_hash)
            .execute(&self.pool).await.map_err(internal)?;
            if done.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn get_blog(&self, id: Id) -> RepoResult<Blog> {
            let row = sqlx::query_as::<_, BlogRow>("SELECT id, owner_id, name, intro, created_at, deleted FROM blogs WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(row.into())
        }

        async fn save_blog(&self, blog: &Blog) -> RepoResult<()> {
            let done = sqlx::query("UPDATE blogs SET name=$2, intro=$3, deleted=$4 WHERE id=$1")
                .bind(blog.id).bind(&blog.name).bind(&blog.intro).bind(blog.deleted)
                .execute(&self.pool).await.map_err(internal)?;
            if done.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let row = sqlx::query_as::<_, PostRow>(
                "INSERT INTO posts (blog_id, title, body) SELECT $1,$2,$3 FROM blogs WHERE id=$1 AND NOT deleted \
                 RETURNING id, blog_id, title, body, created_at, deleted",
            )
            .bind(new.blog_id).bind(&new.title).bind(&new.body)
            .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(row.into())
        }

        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let row = sqlx::query_as::<_, PostRow>(
                "SELECT p.id, p.blog_id, p.title, p.body, p.created_at, p.deleted FROM posts p \
                 JOIN blogs b ON b.id = p.blog_id WHERE p.id = $1 AND NOT p.deleted AND NOT b.deleted",
            )
            .bind(id)
            .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(row.into())
        }

        async fn list_posts(&self, blog_id: Id) -> RepoResult<Vec<Post>> {
            let rows = sqlx::query_as::<_, PostRow>(
                "SELECT id, blog_id, title, body, created_at, deleted FROM posts WHERE blog_id = $1 AND NOT deleted ORDER BY created_at DESC, id DESC",
            )
            .bind(blog_id)
            .fetch_all(&self.pool).await.map_err(internal)?;
            Ok(rows.into_iter().map(Post::from).collect())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn count_top_level_comments(&self, post_id: Id) -> RepoResult<u64> {
            let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments WHERE post_id = $1 AND parent_id IS NULL")
                .bind(post_id)
                .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(n.max(0) as u64)
        }

        async fn fetch_comments_window(&self, post_id: Id, offset: u64, limit: u64) -> RepoResult<Vec<Comment>> {
            let rows = sqlx::query_as::<_, CommentRow>(&format!(r#"
                WITH page AS (
                    SELECT id FROM comments
                    WHERE post_id = $1 AND parent_id IS NULL
                    ORDER BY created_at DESC, id DESC
                    OFFSET $2 LIMIT $3
                )
                SELECT {COMMENT_COLUMNS} FROM comments
                WHERE id IN (SELECT id FROM page) OR parent_id IN (SELECT id FROM page)
                ORDER BY (parent_id IS NOT NULL), created_at DESC, id DESC
            "#))
            .bind(post_id)
            .bind(offset as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool).await.map_err(internal)?;
            Ok(rows.into_iter().map(Comment::from).collect())
        }

        async fn insert_comment(&self, new: NewComment) -> RepoResult<Id> {
            let id = sqlx::query_scalar::<_, Id>(
                "INSERT INTO comments (post_id, body, image, author_user_id, author_nickname, author_profile_image, \
                 author_password_hash, author_blog_owner, secret, anonymous, parent_id, target_user_id, target_nickname) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13) RETURNING id",
            )
            .bind(new.post_id)
            .bind(&new.body)
            .bind(new.image.as_ref())
            .bind(new.author.user_id.as_ref())
            .bind(&new.author.nickname)
            .bind(new.author.profile_image.as_ref())
            .bind(new.author.password_hash.as_ref())
            .bind(new.author.blog_owner)
            .bind(new.secret)
            .bind(new.anonymous)
            .bind(new.parent_id)
            .bind(new.target_user_id.as_ref())
            .bind(new.target_nickname.as_ref())
            .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(id)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let row = sqlx::query_as::<_, CommentRow>(&format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(row.into())
        }
    }
}
