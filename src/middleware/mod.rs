use actix_session::{Session, SessionExt};
use actix_web::{dev, FromRequest, HttpRequest};
use serde::Serialize;
use std::future::{ready, Ready};

use crate::errors::ContentError;
use crate::models::MODERATOR_ROLES;

/// The logged-in author, read from the session cookie.
#[derive(Serialize, Debug, Clone)]
pub struct AuthenticatedAuthor {
    pub user_id: i64,
    pub username: String,
    pub role: String,
}

impl AuthenticatedAuthor {
    pub fn is_moderator(&self) -> bool {
        MODERATOR_ROLES.contains(&self.role.as_str())
    }

    pub fn from_session(session: &Session) -> Option<Self> {
        match (
            session.get::<i64>("user_id"),
            session.get::<String>("username"),
            session.get::<String>("role"),
        ) {
            (Ok(Some(user_id)), Ok(Some(username)), Ok(Some(role))) => {
                Some(AuthenticatedAuthor { user_id, username, role })
            }
            _ => None,
        }
    }
}

impl FromRequest for AuthenticatedAuthor {
    type Error = ContentError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        ready(AuthenticatedAuthor::from_session(&req.get_session()).ok_or(ContentError::Unauthorized))
    }
}

/// An author allowed to write posts. Rejects before the body is read.
#[derive(Debug, Clone)]
pub struct ModeratorAuthor(pub AuthenticatedAuthor);

impl FromRequest for ModeratorAuthor {
    type Error = ContentError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let result = match AuthenticatedAuthor::from_session(&req.get_session()) {
            Some(author) if author.is_moderator() => Ok(ModeratorAuthor(author)),
            Some(author) => {
                log::warn!("Author '{}' with role '{}' attempted a moderator action.", author.username, author.role);
                Err(ContentError::Forbidden("Only moderators can manage posts.".to_string()))
            }
            None => Err(ContentError::Unauthorized),
        };
        ready(result)
    }
}
