use actix_session::Session;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::errors::ContentError;
use crate::helper::public_helpers;
use crate::middleware::AuthenticatedAuthor;
use crate::DbPool;

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

pub fn config_auth(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .app_data(
                web::JsonConfig::default()
                    .error_handler(|err, _req| ContentError::invalid("body", err.to_string()).into()),
            )
            .route("/login", web::post().to(handle_login))
            .route("/logout", web::post().to(handle_logout))
            .route("/me", web::get().to(current_author)),
    );
}

fn session_failure(e: impl std::fmt::Display) -> ContentError {
    ContentError::StorageFailure(format!("session: {}", e))
}

async fn handle_login(
    session: Session,
    pool: web::Data<DbPool>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ContentError> {
    let LoginRequest { username, password } = body.into_inner();

    let author = web::block(move || {
        let conn = pool.get()?;
        Ok::<_, ContentError>(public_helpers::verify_author_credentials(&conn, &username, &password))
    })
    .await??;

    let author = match author {
        Some(author) => author,
        None => {
            return Ok(HttpResponse::Unauthorized()
                .json(json!({ "message": "Invalid credentials or account suspended." })))
        }
    };

    session.renew();
    session.insert("user_id", author.id).map_err(session_failure)?;
    session.insert("username", author.username.clone()).map_err(session_failure)?;
    session.insert("role", author.role.clone()).map_err(session_failure)?;
    log::info!("Author '{}' logged in.", author.username);

    Ok(HttpResponse::Ok().json(author))
}

async fn handle_logout(session: Session) -> HttpResponse {
    session.purge();
    HttpResponse::Ok().json(json!({ "message": "Logged out." }))
}

async fn current_author(author: AuthenticatedAuthor) -> HttpResponse {
    HttpResponse::Ok().json(author)
}
