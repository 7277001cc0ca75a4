use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::errors::ContentError;
use crate::models::db_operations::query_builder::PostFilters;
use crate::models::db_operations::{posts_db_operations, tags_db_operations, users_db_operations};
use crate::models::{
    Author, CategoryWithCount, PostDetailResponse, PostListResponse, PostStatus, PostWithTags, TagWithCount,
};

pub fn verify_author_credentials(conn: &Connection, username: &str, password: &str) -> Option<Author> {
    let author = users_db_operations::verify_credentials(conn, username, password)?;
    if let Err(e) = users_db_operations::update_last_login_time(conn, username) {
        log::warn!("Could not record login time for '{}': {}", username, e);
    }
    Some(author)
}

/// Only moderators may list anything but live published posts.
pub fn ensure_can_list(filters: &PostFilters, is_moderator: bool) -> Result<(), ContentError> {
    if filters.status != PostStatus::Published && !is_moderator {
        return Err(ContentError::Forbidden(format!(
            "Listing {} posts requires a moderator account.",
            filters.status
        )));
    }
    Ok(())
}

pub fn fetch_posts(conn: &Connection, filters: &PostFilters, now: DateTime<Utc>) -> Result<PostListResponse, ContentError> {
    let (posts, pagination) = posts_db_operations::list_posts(conn, filters, now)?;
    Ok(PostListResponse { posts, pagination })
}

/// Resolves the post, bumps its view counter and re-reads it, so the
/// response carries the incremented count.
pub fn fetch_post_detail(
    conn: &Connection,
    identifier: &str,
    include_hidden: bool,
    now: DateTime<Utc>,
) -> Result<PostDetailResponse, ContentError> {
    let not_found = || ContentError::NotFound(format!("Post '{}' not found.", identifier));

    let found = posts_db_operations::read_post_by_identifier(conn, identifier, include_hidden, now)?
        .ok_or_else(not_found)?;
    posts_db_operations::increment_views(conn, found.id)?;
    let post = posts_db_operations::read_post_by_id(conn, found.id)?.ok_or_else(not_found)?;

    let tags = tags_db_operations::read_tags_for_post(conn, post.id)?;
    let related_posts = posts_db_operations::read_related_posts(conn, &post, now)?;

    Ok(PostDetailResponse { post: PostWithTags { post, tags }, related_posts })
}

pub fn fetch_categories(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<CategoryWithCount>, ContentError> {
    Ok(posts_db_operations::read_categories_with_counts(conn, now)?)
}

pub fn fetch_tags(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<TagWithCount>, ContentError> {
    Ok(tags_db_operations::read_tags_with_counts(conn, now)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::posts_db_operations::test_support::{add_category, seed_post, setup_db};
    use chrono::Duration;

    #[test]
    fn detail_returns_incremented_views_and_persists_them() {
        let conn = setup_db();
        let id = seed_post(&conn, "Popular", PostStatus::Published, None, 1, Some(Utc::now() - Duration::days(1)));
        conn.execute("UPDATE posts SET views = 5 WHERE id = ?1", [id]).unwrap();

        let detail = fetch_post_detail(&conn, "popular", false, Utc::now()).unwrap();
        assert_eq!(detail.post.post.views, 6);

        let stored: i64 = conn.query_row("SELECT views FROM posts WHERE id = ?1", [id], |r| r.get(0)).unwrap();
        assert_eq!(stored, 6);
    }

    #[test]
    fn hidden_posts_are_not_found_for_the_public() {
        let conn = setup_db();
        let draft = seed_post(&conn, "Secret", PostStatus::Draft, None, 1, None);

        let err = fetch_post_detail(&conn, &draft.to_string(), false, Utc::now()).unwrap_err();
        assert!(matches!(err, ContentError::NotFound(_)));
        let views: i64 = conn.query_row("SELECT views FROM posts WHERE id = ?1", [draft], |r| r.get(0)).unwrap();
        assert_eq!(views, 0);

        assert!(fetch_post_detail(&conn, &draft.to_string(), true, Utc::now()).is_ok());
    }

    #[test]
    fn detail_includes_related_posts() {
        let conn = setup_db();
        let tips = add_category(&conn, "Writing Tips");
        let yesterday = Some(Utc::now() - Duration::days(1));
        seed_post(&conn, "First", PostStatus::Published, Some(tips), 1, yesterday);
        seed_post(&conn, "Second", PostStatus::Published, Some(tips), 1, yesterday);

        let detail = fetch_post_detail(&conn, "first", false, Utc::now()).unwrap();
        let related: Vec<_> = detail.related_posts.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(related, vec!["second"]);
    }

    #[test]
    fn only_moderators_list_other_statuses() {
        let drafts = PostFilters { status: PostStatus::Draft, ..PostFilters::default() };
        assert!(matches!(ensure_can_list(&drafts, false), Err(ContentError::Forbidden(_))));
        assert!(ensure_can_list(&drafts, true).is_ok());
        assert!(ensure_can_list(&PostFilters::default(), false).is_ok());
    }
}
