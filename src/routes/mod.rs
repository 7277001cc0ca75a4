use actix_web::web;

pub mod auth;
pub mod posts;

/// Mounts the JSON API under `/api`.
pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .configure(posts::config_posts)
            .configure(auth::config_auth),
    );
}
