use std::collections::HashMap;
use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};

use crate::auth::{active_user, optional_viewer, resolve_viewer, Auth};
use crate::cache::HeaderCache;
use crate::comments::CommentService;
use crate::counters::{LikeStore, ViewStore};
use crate::error::{ApiError, ErrorCode};
use crate::models::{CommentInput, Id};
use crate::pagination::{PageRequest, PagingConfig};
use crate::posts::{PostInput, PostService};
use crate::repo::Repo;
use crate::storage::{ImageStores, UploadTarget, IMAGE_SIZE_LIMIT};
use crate::users::{BasicInfoInput, SignUpInput, UserService, WithdrawInput};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        tracing::debug!("rejected json body: {err}");
        ApiError::Validation(ErrorCode::NotValidFormInput).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        tracing::debug!("rejected query string: {err}");
        ApiError::Validation(ErrorCode::NotValidFormInput).into()
    }))
    .service(
        web::scope("/api/v1")
            .service(web::resource("/posts/{id}/comments").route(web::get().to(list_comments)))
            .service(web::resource("/comments").route(web::post().to(register_comment)))
            // before /comments/{id} so POST is not swallowed by that resource
            .service(web::resource("/comments/images").route(web::post().to(upload_comment_image)))
            .service(web::resource("/comments/{id}").route(web::get().to(find_comment)))
            .service(web::resource("/comments/{id}/unlock").route(web::post().to(unlock_comment)))
            .service(web::resource("/posts").route(web::post().to(create_post)))
            .service(web::resource("/posts/{id}").route(web::get().to(get_post)))
            .service(web::resource("/blogs/{id}/posts").route(web::get().to(list_posts)))
            .service(web::resource("/blogs/{id}/visits").route(web::get().to(blog_visits)))
            .service(
                web::resource("/posts/{id}/likes")
                    .route(web::get().to(like_summary))
                    .route(web::post().to(like_post))
                    .route(web::delete().to(unlike_post)),
            )
            .service(web::resource("/posts/{id}/views").route(web::post().to(record_view)))
            .service(web::resource("/users").route(web::post().to(sign_up)))
            .service(web::resource("/users/me").route(web::patch().to(update_basic_info)))
            .service(web::resource("/users/me/header").route(web::get().to(user_header)))
            .service(web::resource("/users/me/likes").route(web::get().to(liked_posts)))
            .service(
                web::resource("/users/{id}/profile-image")
                    .route(web::post().to(upload_profile_image))
                    .route(web::delete().to(remove_profile_image)),
            )
            .service(web::resource("/users/{id}/withdraw").route(web::post().to(withdraw))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub comments: CommentService,
    pub users: UserService,
    pub posts: PostService,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repo>,
        header_cache: Arc<dyn HeaderCache>,
        likes: Arc<dyn LikeStore>,
        views: Arc<dyn ViewStore>,
        images: ImageStores,
        file_server_base: impl Into<String>,
        paging: PagingConfig,
    ) -> Self {
        let comments = CommentService::new(repo.clone(), images.object_storage.clone(), paging);
        let users = UserService::new(repo.clone(), header_cache, likes.clone(), views.clone(), images, file_server_base);
        let posts = PostService::new(repo.clone(), likes, views);
        Self { repo, comments, users, posts }
    }
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope { success: true, data })
}

fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(Envelope { success: true, data })
}

/// Multipart body split into the uploaded file and its text fields.
#[derive(Default)]
struct UploadForm {
    file: Option<Vec<u8>>,
    fields: HashMap<String, String>,
}

async fn read_upload_form(mut payload: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        tracing::warn!("multipart error: {e}");
        ApiError::Validation(ErrorCode::NotValidFile)
    })? {
        let Some(name) = field.content_disposition().get_name().map(str::to_string) else { continue };
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            tracing::warn!("stream read error: {e}");
            ApiError::Validation(ErrorCode::NotValidFile)
        })? {
            if bytes.len() + chunk.len() > IMAGE_SIZE_LIMIT {
                return Err(ApiError::Validation(ErrorCode::NotValidFile));
            }
            bytes.extend_from_slice(&chunk);
        }
        if name == "file" {
            form.file = Some(bytes);
        } else {
            form.fields.insert(name, String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    Ok(form)
}

// ---------------- comments ----------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentListQuery {
    pub page: Option<i64>,
    pub page_size: Option<u64>,
    pub blog_id: Option<Id>,
}

pub async fn list_comments(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<CommentListQuery>,
) -> Result<HttpResponse, ApiError> {
    let viewer = optional_viewer(data.repo.as_ref(), auth.as_ref()).await?;
    let q = query.into_inner();
    let req = PageRequest { page: q.page, page_size: q.page_size };
    let page = data.comments.list_comments(path.into_inner(), q.blog_id, &req, viewer).await?;
    Ok(ok(page))
}

pub async fn register_comment(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    payload: web::Json<CommentInput>,
) -> Result<HttpResponse, ApiError> {
    let viewer = resolve_viewer(data.repo.as_ref(), auth.as_ref()).await?;
    let registered = data.comments.register_comment(payload.into_inner(), viewer).await?;
    Ok(created(registered))
}

pub async fn find_comment(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let viewer = optional_viewer(data.repo.as_ref(), auth.as_ref()).await?;
    Ok(ok(data.comments.find_comment(path.into_inner(), viewer).await?))
}

#[derive(Debug, Deserialize)]
pub struct UnlockInput {
    pub password: String,
}

pub async fn unlock_comment(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UnlockInput>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(data.comments.unlock_comment(path.into_inner(), &payload.password).await?))
}

#[derive(Serialize)]
struct ImageSrc {
    src: String,
}

pub async fn upload_comment_image(data: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, ApiError> {
    let form = read_upload_form(payload).await?;
    let bytes = form.file.ok_or(ApiError::Validation(ErrorCode::NotValidFile))?;
    let src = data.comments.upload_comment_image(bytes).await?;
    Ok(created(ImageSrc { src }))
}

// ---------------- posts ----------------

pub async fn create_post(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<PostInput>,
) -> Result<HttpResponse, ApiError> {
    let author = active_user(data.repo.as_ref(), &auth).await?;
    Ok(created(data.posts.create_post(&author, payload.into_inner()).await?))
}

pub async fn get_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(ok(data.posts.get_post(path.into_inner()).await?))
}

pub async fn list_posts(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(ok(data.posts.list_posts(path.into_inner()).await?))
}

pub async fn blog_visits(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(ok(data.posts.blog_visits(path.into_inner()).await?))
}

pub async fn liked_posts(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = active_user(data.repo.as_ref(), &auth).await?;
    Ok(ok(data.posts.liked_posts(&user.id).await?))
}

pub async fn like_summary(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let viewer = auth.as_ref().map(|a| a.user_id());
    Ok(ok(data.posts.like_summary(path.into_inner(), viewer).await?))
}

pub async fn like_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user = active_user(data.repo.as_ref(), &auth).await?;
    Ok(ok(data.posts.like(path.into_inner(), &user.id).await?))
}

pub async fn unlike_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user = active_user(data.repo.as_ref(), &auth).await?;
    Ok(ok(data.posts.unlike(path.into_inner(), &user.id).await?))
}

pub async fn record_view(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let visitor = match auth.as_ref() {
        Some(a) => format!("user:{}", a.user_id()),
        // socket address only; forwarding headers are client-controlled
        None => match req.peer_addr() {
            Some(addr) => format!("ip:{}", addr.ip()),
            None => "ip:unknown".to_string(),
        },
    };
    Ok(ok(data.posts.record_view(path.into_inner(), &visitor).await?))
}

// ---------------- users ----------------

pub async fn sign_up(data: web::Data<AppState>, payload: web::Json<SignUpInput>) -> Result<HttpResponse, ApiError> {
    Ok(created(data.users.sign_up(payload.into_inner()).await?))
}

pub async fn user_header(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(ok(data.users.find_user_header(auth.user_id()).await?))
}

pub async fn update_basic_info(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<BasicInfoInput>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(data.users.update_basic_info(auth.user_id(), payload.into_inner()).await?))
}

pub async fn upload_profile_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut form = read_upload_form(payload).await?;
    let bytes = form.file.take().ok_or(ApiError::Validation(ErrorCode::NotValidFile))?;
    let target = match form.fields.get("uploadType") {
        Some(t) => t
            .parse::<UploadTarget>()
            .map_err(|_| ApiError::Validation(ErrorCode::NotValidFormInput))?,
        None => UploadTarget::ObjectStorage,
    };
    let upload_key = form.fields.remove("uploadKey");
    let header = data
        .users
        .upload_profile_image(auth.user_id(), &path.into_inner(), bytes, target, upload_key)
        .await?;
    Ok(ok(header))
}

pub async fn remove_profile_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(data.users.remove_profile_image(auth.user_id(), &path.into_inner()).await?))
}

pub async fn withdraw(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<WithdrawInput>,
) -> Result<HttpResponse, ApiError> {
    data.users.withdraw(auth.user_id(), &path.into_inner(), payload.into_inner()).await?;
    Ok(ok(serde_json::json!({ "withdrawn": true })))
}
