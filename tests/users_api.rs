#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use freeblog::auth::create_jwt;
use freeblog::cache::InMemHeaderCache;
use freeblog::counters::InMemCounters;
use freeblog::pagination::PagingConfig;
use freeblog::repo::inmem::InMemRepo;
use freeblog::routes::{config, AppState};
use freeblog::storage::{FsImageStore, ImageStores};
use serde_json::{json, Value};
use serial_test::serial;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const FILES: &str = "http://files.test";
const BUCKET: &str = "http://bucket.test";

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

/// Object storage and the file server both write under `root`, in separate trees.
fn state(root: &Path) -> AppState {
    let files = Arc::new(FsImageStore::new(root.join("files"), FILES));
    let bucket = Arc::new(FsImageStore::new(root.join("bucket"), BUCKET));
    let counters = Arc::new(InMemCounters::new());
    AppState::new(
        Arc::new(InMemRepo::new()),
        Arc::new(InMemHeaderCache::new(Duration::from_secs(60))),
        counters.clone(),
        counters,
        ImageStores { object_storage: bucket, file_server: files },
        FILES,
        PagingConfig::default(),
    )
}

fn bearer(user_id: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", create_jwt(user_id).unwrap()))
}

async fn body_json(resp: actix_web::dev::ServiceResponse) -> Value {
    serde_json::from_slice(&test::read_body(resp).await).unwrap()
}

/// Multipart body with a `file` part followed by plain text fields.
fn build_multipart(bytes: &[u8], fields: &[(&str, &str)], boundary: &str) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    let disp = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"avatar.png\"\r\nContent-Type: image/png\r\n\r\n"
    );
    body.extend_from_slice(disp.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// PNG signature and header chunk; `tag` makes the bytes (and so the key) distinct.
fn png(tag: u8) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R'];
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, tag]);
    bytes
}

fn local_path(root: &Path, src: &str) -> std::path::PathBuf {
    if let Some(rel) = src.strip_prefix(&format!("{FILES}/")) {
        root.join("files").join(rel)
    } else {
        root.join("bucket").join(src.trim_start_matches(&format!("{BUCKET}/")))
    }
}

macro_rules! app {
    ($dir:expr) => {
        test::init_service(App::new().app_data(web::Data::new(state($dir))).configure(config)).await
    };
}

macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status().as_u16();
        (status, body_json(resp).await)
    }};
}

macro_rules! sign_up {
    ($app:expr, $id:expr) => {{
        call!(
            $app,
            test::TestRequest::post().uri("/api/v1/users").set_json(json!({
                "id": $id,
                "email": format!("{}@example.com", $id),
                "password": "pw-1234",
                "nickname": $id,
            }))
        )
    }};
}

#[actix_web::test]
#[serial]
async fn sign_up_and_update_header() {
    setup_env();
    let dir = tempfile::tempdir().unwrap();
    let app = app!(dir.path());

    let (status, v) = sign_up!(app, "alice");
    assert_eq!(status, 201, "{v}");
    assert_eq!(v["data"]["id"], "alice");
    assert_eq!(v["data"]["blogName"], "alice's blog");

    let (status, v) = call!(app, test::TestRequest::get().uri("/api/v1/users/me/header").insert_header(bearer("alice")));
    assert_eq!(status, 200);
    assert_eq!(v["data"]["nickname"], "alice");

    let (status, v) = call!(
        app,
        test::TestRequest::patch()
            .uri("/api/v1/users/me")
            .insert_header(bearer("alice"))
            .set_json(json!({ "nickname": "Alice", "greetings": "hello", "blogIntro": "notes" }))
    );
    assert_eq!(status, 200, "{v}");
    assert_eq!(v["data"]["nickname"], "Alice");

    let (_, v) = call!(app, test::TestRequest::get().uri("/api/v1/users/me/header").insert_header(bearer("alice")));
    assert_eq!(v["data"]["nickname"], "Alice");
    assert_eq!(v["data"]["greetings"], "hello");
    assert_eq!(v["data"]["blogIntro"], "notes");
    assert_eq!(v["data"]["blogName"], "alice's blog");

    let (status, v) = call!(
        app,
        test::TestRequest::patch()
            .uri("/api/v1/users/me")
            .insert_header(bearer("alice"))
            .set_json(json!({ "nickname": "   " }))
    );
    assert_eq!(status, 400);
    assert_eq!(v["code"], "NOT_VALID_FORM_INPUT");

    let (status, v) = call!(app, test::TestRequest::get().uri("/api/v1/users/me/header"));
    assert_eq!(status, 401);
    assert_eq!(v["code"], "NOT_LOGGED_IN");
}

#[actix_web::test]
#[serial]
async fn duplicate_accounts_are_rejected() {
    setup_env();
    let dir = tempfile::tempdir().unwrap();
    let app = app!(dir.path());
    let (status, _) = sign_up!(app, "alice");
    assert_eq!(status, 201);

    let (status, v) = sign_up!(app, "alice");
    assert_eq!(status, 409);
    assert_eq!(v["success"], false);
    assert_eq!(v["code"], "ALREADY_SAME_EMAIL");

    let (status, v) = call!(
        app,
        test::TestRequest::post().uri("/api/v1/users").set_json(json!({
            "id": "alice", "email": "other@example.com", "password": "pw", "nickname": "x",
        }))
    );
    assert_eq!(status, 409);
    assert_eq!(v["code"], "ALREADY_SAME_ID");
}

#[actix_web::test]
#[serial]
async fn profile_images_are_replaced_and_removed() {
    setup_env();
    let dir = tempfile::tempdir().unwrap();
    let app = app!(dir.path());
    sign_up!(app, "alice");
    sign_up!(app, "bob");

    let (ct, body) = build_multipart(&png(1), &[("uploadType", "FILE_SERVER")], "XBOUNDARY");
    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/users/alice/profile-image")
            .insert_header(bearer("alice"))
            .insert_header(("Content-Type", ct))
            .set_payload(body)
    );
    assert_eq!(status, 200, "{v}");
    let first = v["data"]["profileImage"].as_str().unwrap().to_string();
    assert!(first.starts_with("http://files.test/profile/"), "{first}");
    assert!(local_path(dir.path(), &first).exists());

    // replacing the image removes the old file
    let (ct, body) = build_multipart(&png(2), &[("uploadType", "S3"), ("uploadKey", "k-2")], "XBOUNDARY");
    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/users/alice/profile-image")
            .insert_header(bearer("alice"))
            .insert_header(("Content-Type", ct))
            .set_payload(body)
    );
    assert_eq!(status, 200, "{v}");
    let second = v["data"]["profileImage"].as_str().unwrap().to_string();
    assert!(second.starts_with("http://bucket.test/profile/"), "{second}");
    assert!(local_path(dir.path(), &second).exists());
    assert!(!local_path(dir.path(), &first).exists());

    let (_, v) = call!(app, test::TestRequest::get().uri("/api/v1/users/me/header").insert_header(bearer("alice")));
    assert_eq!(v["data"]["profileImage"], second.as_str());

    // someone else's profile
    let (ct, body) = build_multipart(&png(3), &[], "XBOUNDARY");
    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/users/alice/profile-image")
            .insert_header(bearer("bob"))
            .insert_header(("Content-Type", ct))
            .set_payload(body)
    );
    assert_eq!(status, 403);
    assert_eq!(v["code"], "MISMATCH_ID");

    let (ct, body) = build_multipart(&png(3), &[("uploadType", "FTP")], "XBOUNDARY");
    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/users/alice/profile-image")
            .insert_header(bearer("alice"))
            .insert_header(("Content-Type", ct))
            .set_payload(body)
    );
    assert_eq!(status, 400);
    assert_eq!(v["code"], "NOT_VALID_FORM_INPUT");

    let (status, v) = call!(
        app,
        test::TestRequest::delete().uri("/api/v1/users/alice/profile-image").insert_header(bearer("alice"))
    );
    assert_eq!(status, 200);
    assert!(v["data"]["profileImage"].is_null());
    assert!(!local_path(dir.path(), &second).exists());

    let (_, v) = call!(app, test::TestRequest::get().uri("/api/v1/users/me/header").insert_header(bearer("alice")));
    assert!(v["data"]["profileImage"].is_null());
}

#[actix_web::test]
#[serial]
async fn withdrawal_closes_account_and_blog() {
    setup_env();
    let dir = tempfile::tempdir().unwrap();
    let app = app!(dir.path());
    let (_, v) = sign_up!(app, "alice");
    let blog_id = v["data"]["blogId"].as_i64().unwrap();
    sign_up!(app, "bob");

    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/posts")
            .insert_header(bearer("alice"))
            .set_json(json!({ "title": "Hello", "body": "First post" }))
    );
    assert_eq!(status, 201);
    let alice_post = v["data"]["id"].as_i64().unwrap();
    let (_, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/posts")
            .insert_header(bearer("bob"))
            .set_json(json!({ "title": "Bob's", "body": "Still here" }))
    );
    let bob_post = v["data"]["id"].as_i64().unwrap();
    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/comments")
            .insert_header(bearer("alice"))
            .set_json(json!({ "postId": bob_post, "body": "nice" }))
    );
    assert_eq!(status, 201);
    let alice_comment = v["data"]["id"].as_i64().unwrap();
    // warm the header cache
    let (status, _) = call!(app, test::TestRequest::get().uri("/api/v1/users/me/header").insert_header(bearer("alice")));
    assert_eq!(status, 200);

    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/users/alice/withdraw")
            .insert_header(bearer("bob"))
            .set_json(json!({ "password": "pw-1234" }))
    );
    assert_eq!(status, 403);
    assert_eq!(v["code"], "MISMATCH_ID");

    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/users/alice/withdraw")
            .insert_header(bearer("alice"))
            .set_json(json!({ "password": "wrong" }))
    );
    assert_eq!(status, 403);
    assert_eq!(v["code"], "MISMATCH_PASSWORD");

    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/users/alice/withdraw")
            .insert_header(bearer("alice"))
            .set_json(json!({ "password": "pw-1234" }))
    );
    assert_eq!(status, 200, "{v}");
    assert_eq!(v["data"]["withdrawn"], true);

    let (status, v) = call!(app, test::TestRequest::get().uri("/api/v1/users/me/header").insert_header(bearer("alice")));
    assert_eq!(status, 403);
    assert_eq!(v["code"], "NOT_ACTIVE_ACCOUNT");

    let (status, v) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/blogs/{blog_id}/posts")));
    assert_eq!(status, 404);
    assert_eq!(v["code"], "BLOG_NOT_FOUND");

    // the withdrawn blog's posts are closed to reads, comments and likes
    let (status, v) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/posts/{alice_post}")));
    assert_eq!(status, 404);
    assert_eq!(v["code"], "POST_NOT_FOUND");
    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/comments")
            .insert_header(bearer("bob"))
            .set_json(json!({ "postId": alice_post, "body": "hello?" }))
    );
    assert_eq!(status, 404);
    assert_eq!(v["code"], "POST_NOT_FOUND");
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/posts/{alice_post}/likes")).insert_header(bearer("bob"))
    );
    assert_eq!(status, 404);
    let (status, _) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/posts/{alice_post}/comments")));
    assert_eq!(status, 404);

    // a leftover token still reads public pages, as an anonymous visitor
    let (status, v) = call!(
        app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/posts/{bob_post}/comments"))
            .insert_header(bearer("alice"))
    );
    assert_eq!(status, 200, "{v}");
    assert_eq!(v["data"]["comments"][0]["body"], "nice");
    assert_eq!(v["data"]["comments"][0]["isOwner"], false);
    let (status, v) = call!(
        app,
        test::TestRequest::get().uri(&format!("/api/v1/comments/{alice_comment}")).insert_header(bearer("alice"))
    );
    assert_eq!(status, 200);
    assert_eq!(v["data"]["isOwner"], false);
    // but cannot write
    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/comments")
            .insert_header(bearer("alice"))
            .set_json(json!({ "postId": bob_post, "body": "again" }))
    );
    assert_eq!(status, 403);
    assert_eq!(v["code"], "NOT_ACTIVE_ACCOUNT");

    let (status, v) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/users/alice/withdraw")
            .insert_header(bearer("alice"))
            .set_json(json!({ "password": "pw-1234" }))
    );
    assert_eq!(status, 403);
    assert_eq!(v["code"], "NOT_ACTIVE_ACCOUNT");
}
