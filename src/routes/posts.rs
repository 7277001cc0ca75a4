use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::errors::ContentError;
use crate::helper::media_helpers::MediaStore;
use crate::helper::{content_helpers, form_helpers, public_helpers};
use crate::middleware::{AuthenticatedAuthor, ModeratorAuthor};
use crate::models::db_operations::query_builder::{PostFilters, PostListQuery};
use crate::DbPool;

pub fn config_posts(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ContentError::invalid("query", err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|_err, _req| ContentError::NotFound("Post not found.".to_string()).into()),
    )
    .route("/posts", web::get().to(list_posts))
    .route("/posts", web::post().to(create_post))
    // The listings must be registered before the `{identifier}` catch-all.
    .route("/posts/categories/list", web::get().to(list_categories))
    .route("/posts/tags/list", web::get().to(list_tags))
    .route("/posts/{identifier}", web::get().to(get_post))
    .route("/posts/{id}", web::put().to(update_post))
    .route("/posts/{id}", web::delete().to(archive_post));
}

fn is_moderator(viewer: &Option<AuthenticatedAuthor>) -> bool {
    viewer.as_ref().map_or(false, AuthenticatedAuthor::is_moderator)
}

async fn list_posts(
    pool: web::Data<DbPool>,
    query: web::Query<PostListQuery>,
    viewer: Option<AuthenticatedAuthor>,
) -> Result<HttpResponse, ContentError> {
    let filters = PostFilters::from_query(&query).map_err(ContentError::ValidationFailed)?;
    public_helpers::ensure_can_list(&filters, is_moderator(&viewer))?;

    let response = web::block(move || {
        let conn = pool.get()?;
        public_helpers::fetch_posts(&conn, &filters, Utc::now())
    })
    .await??;

    Ok(HttpResponse::Ok().json(response))
}

async fn get_post(
    pool: web::Data<DbPool>,
    identifier: web::Path<String>,
    viewer: Option<AuthenticatedAuthor>,
) -> Result<HttpResponse, ContentError> {
    let identifier = identifier.into_inner();
    let include_hidden = is_moderator(&viewer);

    let detail = web::block(move || {
        let conn = pool.get()?;
        public_helpers::fetch_post_detail(&conn, &identifier, include_hidden, Utc::now())
    })
    .await??;

    Ok(HttpResponse::Ok().json(detail))
}

/// Runs a write that owns an uploaded image on the blocking pool. If the
/// pool fails before or while running `write`, its own cleanup never ran,
/// so the upload is deleted here.
async fn block_with_upload<T, F>(
    media: web::Data<dyn MediaStore>,
    image: Option<String>,
    write: F,
) -> Result<T, ContentError>
where
    F: FnOnce(&dyn MediaStore, Option<String>) -> Result<T, ContentError> + Send + 'static,
    T: Send + 'static,
{
    let store = media.clone();
    let uploaded = image.clone();
    match web::block(move || write(store.get_ref(), uploaded)).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("Blocking write task failed: {}", e);
            content_helpers::discard_upload(media.get_ref(), image.as_deref());
            Err(e.into())
        }
    }
}

async fn create_post(
    author: ModeratorAuthor,
    req: HttpRequest,
    payload: web::Payload,
    pool: web::Data<DbPool>,
    media: web::Data<dyn MediaStore>,
) -> Result<HttpResponse, ContentError> {
    let (form, image) = form_helpers::read_post_form(&req, payload, &media).await?;
    let author_id = author.0.user_id;

    let created = block_with_upload(media, image, move |store, image| {
        content_helpers::create_post(&pool, store, author_id, form, image, Utc::now())
    })
    .await?;

    Ok(HttpResponse::Created().json(created))
}

async fn update_post(
    _author: ModeratorAuthor,
    path: web::Path<i64>,
    req: HttpRequest,
    payload: web::Payload,
    pool: web::Data<DbPool>,
    media: web::Data<dyn MediaStore>,
) -> Result<HttpResponse, ContentError> {
    let post_id = path.into_inner();
    let (form, image) = form_helpers::read_post_form(&req, payload, &media).await?;

    let updated = block_with_upload(media, image, move |store, image| {
        content_helpers::update_post(&pool, store, post_id, form, image, Utc::now())
    })
    .await?;

    Ok(HttpResponse::Ok().json(updated))
}

async fn archive_post(
    author: ModeratorAuthor,
    path: web::Path<i64>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ContentError> {
    let post_id = path.into_inner();

    let post = web::block(move || content_helpers::archive_post(&pool, post_id, Utc::now())).await??;
    log::info!("Post {} archived by '{}'.", post_id, author.0.username);

    Ok(HttpResponse::Ok().json(json!({ "message": "Post archived.", "post": post })))
}

async fn list_categories(pool: web::Data<DbPool>) -> Result<HttpResponse, ContentError> {
    let categories = web::block(move || {
        let conn = pool.get()?;
        public_helpers::fetch_categories(&conn, Utc::now())
    })
    .await??;

    Ok(HttpResponse::Ok().json(categories))
}

async fn list_tags(pool: web::Data<DbPool>) -> Result<HttpResponse, ContentError> {
    let tags = web::block(move || {
        let conn = pool.get()?;
        public_helpers::fetch_tags(&conn, Utc::now())
    })
    .await??;

    Ok(HttpResponse::Ok().json(tags))
}
