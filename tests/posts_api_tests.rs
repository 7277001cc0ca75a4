use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::cookie::{Cookie, Key};
use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use inkpress_backend::helper::media_helpers::{LocalMediaStore, MediaStore};
use inkpress_backend::models::db_operations::posts_db_operations::{self, NewPostRow};
use inkpress_backend::models::db_operations::users_db_operations;
use inkpress_backend::models::PostStatus;
use inkpress_backend::setup::db_setup;
use inkpress_backend::{routes, DbPool};

const EDITOR: (&str, &str) = ("editor", "editor-pass-1");
const WRITER: (&str, &str) = ("writer", "writer-pass-1");

struct TestEnv {
    dir: TempDir,
    pool: DbPool,
    media: web::Data<dyn MediaStore>,
}

fn test_env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let pool = db_setup::build_pool(&dir.path().join("content.db"), std::time::Duration::from_secs(1)).unwrap();
    {
        let mut conn = pool.get().unwrap();
        db_setup::setup_content_db(&mut conn).unwrap();
        users_db_operations::create_user(&conn, EDITOR.0, EDITOR.1, "moderator").unwrap();
        users_db_operations::create_user(&conn, WRITER.0, WRITER.1, "author").unwrap();
        posts_db_operations::create_category(&conn, "Writing Tips", "writing-tips").unwrap();
    }
    let store: Arc<dyn MediaStore> = Arc::new(LocalMediaStore::new(dir.path().join("media"), 1024 * 1024));
    TestEnv { dir, pool, media: web::Data::from(store) }
}

fn seed_published(pool: &DbPool, title: &str, slug: &str, views: i64) -> i64 {
    let conn = pool.get().unwrap();
    let now = Utc::now();
    let id = posts_db_operations::insert_post(
        &conn,
        &NewPostRow {
            title,
            slug,
            content: "Body",
            excerpt: None,
            category_id: Some(1),
            author_id: 1,
            featured_image: None,
            status: PostStatus::Published,
            published_at: Some(now - Duration::days(1)),
            meta_title: None,
            meta_description: None,
            now,
        },
    )
    .unwrap();
    conn.execute("UPDATE posts SET views = ?1 WHERE id = ?2", [views, id]).unwrap();
    id
}

macro_rules! init_app {
    ($env:expr) => {
        test::init_service(
            App::new()
                .wrap(
                    SessionMiddleware::builder(CookieSessionStore::default(), Key::from(&[7u8; 64]))
                        .cookie_secure(false)
                        .build(),
                )
                .app_data(web::Data::new($env.pool.clone()))
                .app_data($env.media.clone())
                .configure(routes::config_api),
        )
        .await
    };
}

macro_rules! login {
    ($app:expr, $user:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "username": $user.0, "password": $user.1 }))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie: Cookie<'static> = resp.response().cookies().next().expect("session cookie").into_owned();
        cookie
    }};
}

#[actix_web::test]
async fn detail_increments_views_and_persists() {
    let env = test_env();
    seed_published(&env.pool, "Five Views", "five-views", 5);
    let app = init_app!(env);

    let first: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/posts/five-views").to_request()).await;
    assert_eq!(first["post"]["views"], 6);
    assert!(first["post"]["tags"].is_array());
    assert!(first["relatedPosts"].is_array());

    let second: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/posts/1").to_request()).await;
    assert_eq!(second["post"]["views"], 7);
}

#[actix_web::test]
async fn list_returns_posts_and_pagination() {
    let env = test_env();
    for i in 0..3 {
        seed_published(&env.pool, &format!("Entry {}", i), &format!("entry-{}", i), 0);
    }
    let app = init_app!(env);

    let req = test::TestRequest::get().uri("/api/posts?category=writing-tips&limit=2&page=2").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["posts"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"], json!({ "page": 2, "limit": 2, "total": 3, "pages": 2 }));
}

#[actix_web::test]
async fn invalid_query_is_rejected_with_field_detail() {
    let env = test_env();
    let app = init_app!(env);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/posts?sort=password").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["errors"][0]["field"], "sort");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/posts?page=abc").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn writes_require_a_moderator() {
    let env = test_env();
    let app = init_app!(env);
    let payload = json!({ "title": "Nope", "content": "Body" });

    let anonymous = test::TestRequest::post().uri("/api/posts").set_json(&payload).to_request();
    assert_eq!(test::call_service(&app, anonymous).await.status(), StatusCode::UNAUTHORIZED);

    let cookie = login!(app, WRITER);
    let as_author = test::TestRequest::post().uri("/api/posts").cookie(cookie.clone()).set_json(&payload).to_request();
    assert_eq!(test::call_service(&app, as_author).await.status(), StatusCode::FORBIDDEN);

    let drafts = test::TestRequest::get().uri("/api/posts?status=draft").cookie(cookie).to_request();
    assert_eq!(test::call_service(&app, drafts).await.status(), StatusCode::FORBIDDEN);

    let anonymous_drafts = test::TestRequest::get().uri("/api/posts?status=draft").to_request();
    assert_eq!(test::call_service(&app, anonymous_drafts).await.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn moderator_creates_updates_and_archives() {
    let env = test_env();
    let app = init_app!(env);
    let cookie = login!(app, EDITOR);

    let create = test::TestRequest::post()
        .uri("/api/posts")
        .cookie(cookie.clone())
        .set_json(json!({
            "title": "Mystery Novels",
            "content": "Body",
            "category_id": 1,
            "tags": "Mystery, Books",
            "status": "published"
        }))
        .to_request();
    let resp = test::call_service(&app, create).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["slug"], "mystery-novels");
    assert_eq!(created["tags"].as_array().unwrap().len(), 2);
    let id = created["id"].as_i64().unwrap();

    let duplicate = test::TestRequest::post()
        .uri("/api/posts")
        .cookie(cookie.clone())
        .set_json(json!({ "title": "mystery novels!", "content": "Other", "tags": ["mystery"] }))
        .to_request();
    let resp = test::call_service(&app, duplicate).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("mystery-novels"));

    let update = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", id))
        .cookie(cookie.clone())
        .set_json(json!({ "tags": ["mystery", "Crime"] }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, update).await;
    let names: Vec<_> = updated["tags"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Crime", "Mystery"]);

    let archive = test::TestRequest::delete().uri(&format!("/api/posts/{}", id)).cookie(cookie.clone()).to_request();
    let archived: Value = test::call_and_read_body_json(&app, archive).await;
    assert_eq!(archived["post"]["status"], "archived");
    assert!(!archived["post"]["published_at"].is_null());

    let public = test::TestRequest::get().uri(&format!("/api/posts/{}", id)).to_request();
    assert_eq!(test::call_service(&app, public).await.status(), StatusCode::NOT_FOUND);

    let as_moderator = test::TestRequest::get().uri(&format!("/api/posts/{}", id)).cookie(cookie).to_request();
    assert_eq!(test::call_service(&app, as_moderator).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn multipart_upload_stores_featured_image() {
    let env = test_env();
    let app = init_app!(env);
    let cookie = login!(app, EDITOR);

    let boundary = "InkpressBoundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nPictured Post\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"content\"\r\n\r\nBody\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"tags\"\r\n\r\nphoto, travel\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"cover.png\"\r\n\
         Content-Type: image/png\r\n\r\nPNGDATA\r\n\
         --{b}--\r\n",
        b = boundary
    );
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .cookie(cookie)
        .insert_header((header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary)))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let created: Value = test::read_body_json(resp).await;
    let public_path = created["featured_image"].as_str().unwrap();
    assert!(public_path.starts_with("/media/featured/"));
    let on_disk = env.dir.path().join("media").join(public_path.trim_start_matches("/media/"));
    assert_eq!(std::fs::read(on_disk).unwrap(), b"PNGDATA");
}

#[actix_web::test]
async fn missing_targets_are_not_found() {
    let env = test_env();
    let app = init_app!(env);
    let cookie = login!(app, EDITOR);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/posts/no-such-post").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["message"].is_string());

    let update = test::TestRequest::put()
        .uri("/api/posts/999")
        .cookie(cookie.clone())
        .set_json(json!({ "title": "Ghost" }))
        .to_request();
    assert_eq!(test::call_service(&app, update).await.status(), StatusCode::NOT_FOUND);

    let archive = test::TestRequest::delete().uri("/api/posts/abc").cookie(cookie).to_request();
    assert_eq!(test::call_service(&app, archive).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn listings_are_not_captured_by_identifier_route() {
    let env = test_env();
    seed_published(&env.pool, "Counted", "counted", 0);
    let app = init_app!(env);

    let categories: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/posts/categories/list").to_request()).await;
    assert_eq!(categories[0]["slug"], "writing-tips");
    assert_eq!(categories[0]["post_count"], 1);

    let tags: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/posts/tags/list").to_request()).await;
    assert!(tags.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn session_identity_round_trip() {
    let env = test_env();
    let app = init_app!(env);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/auth/me").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let bad = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": EDITOR.0, "password": "wrong" }))
        .to_request();
    assert_eq!(test::call_service(&app, bad).await.status(), StatusCode::UNAUTHORIZED);

    let cookie = login!(app, EDITOR);
    let me: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/auth/me").cookie(cookie).to_request()).await;
    assert_eq!(me["username"], "editor");
    assert_eq!(me["role"], "moderator");
}
