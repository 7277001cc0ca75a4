//! The write path for posts.
//!
//! Every create, update and archive runs as one unit of work on a single
//! pooled connection inside an IMMEDIATE transaction. Input is validated
//! before the connection is checked out. When anything fails, the image
//! uploaded with the request is deleted again; when an image replacement
//! succeeds, the previous image is deleted instead. Both deletions are best
//! effort: the database is already in its final state when they run.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::errors::ContentError;
use crate::helper::media_helpers::MediaStore;
use crate::models::db_operations::posts_db_operations::{self, ColumnUpdates, NewPostRow};
use crate::models::db_operations::{is_unique_violation, tags_db_operations, DbError};
use crate::models::post_payload::{NewPost, PostChanges, PostForm};
use crate::models::publication::resolve_published_at;
use crate::models::{Post, PostStatus, PostWithTags};
use crate::DbPool;

/// Runs `f` inside a write transaction. The transaction commits when `f`
/// returns `Ok` and rolls back on `Err` or unwind; the lock is taken up
/// front so concurrent writers queue on `busy_timeout` instead of failing
/// mid-transaction.
pub fn with_transaction<T, E, F>(conn: &mut Connection, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Deletes an image stored for a request that did not go through.
pub fn discard_upload(media: &dyn MediaStore, image: Option<&str>) {
    if let Some(path) = image {
        match media.delete(path) {
            Ok(()) => log::info!("Removed orphaned upload {}.", path),
            Err(e) => log::error!("Failed to remove orphaned upload {}: {}", path, e),
        }
    }
}

fn post_not_found(post_id: i64) -> ContentError {
    ContentError::NotFound(format!("Post {} not found.", post_id))
}

fn ensure_category(conn: &Connection, category_id: Option<i64>) -> Result<(), ContentError> {
    match category_id {
        Some(id) if !posts_db_operations::category_exists(conn, id)? => {
            Err(ContentError::NotFound(format!("Category {} not found.", id)))
        }
        _ => Ok(()),
    }
}

fn load_with_tags(conn: &Connection, post_id: i64) -> Result<PostWithTags, ContentError> {
    let post = posts_db_operations::read_post_by_id(conn, post_id)?.ok_or_else(|| post_not_found(post_id))?;
    let tags = tags_db_operations::read_tags_for_post(conn, post_id)?;
    Ok(PostWithTags { post, tags })
}

fn slug_conflict(slug: &str) -> ContentError {
    ContentError::Conflict(format!("A post with the slug '{}' already exists.", slug))
}

fn insert_new_post(
    conn: &Connection,
    author_id: i64,
    new_post: &NewPost,
    image: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PostWithTags, ContentError> {
    ensure_category(conn, new_post.category_id)?;

    if posts_db_operations::slug_exists(conn, &new_post.slug)? {
        return Err(slug_conflict(&new_post.slug));
    }

    let row = NewPostRow {
        title: &new_post.title,
        slug: &new_post.slug,
        content: &new_post.content,
        excerpt: new_post.excerpt.as_deref(),
        category_id: new_post.category_id,
        author_id,
        featured_image: image,
        status: new_post.status,
        published_at: resolve_published_at(new_post.status, None, new_post.scheduled_publish, now),
        meta_title: new_post.meta_title.as_deref(),
        meta_description: new_post.meta_description.as_deref(),
        now,
    };
    // The UNIQUE index is the authority; the check above only spares the
    // common case a failed statement.
    let post_id = match posts_db_operations::insert_post(conn, &row) {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => {
            log::warn!("Slug '{}' was taken between check and insert.", new_post.slug);
            return Err(slug_conflict(&new_post.slug));
        }
        Err(e) => return Err(DbError::from(e).into()),
    };

    tags_db_operations::replace_post_tags(conn, post_id, &new_post.tags)?;
    load_with_tags(conn, post_id)
}

/// Creates a post. `image` is the public path of a featured image already
/// written for this request; it is removed again if the create fails.
pub fn create_post(
    pool: &DbPool,
    media: &dyn MediaStore,
    author_id: i64,
    form: PostForm,
    image: Option<String>,
    now: DateTime<Utc>,
) -> Result<PostWithTags, ContentError> {
    let result = form.into_new_post().and_then(|new_post| {
        let mut conn = pool.get()?;
        with_transaction(&mut conn, |tx| insert_new_post(tx, author_id, &new_post, image.as_deref(), now))
    });

    match &result {
        Ok(created) => log::info!("Created post {} '{}'.", created.post.id, created.post.slug),
        Err(_) => discard_upload(media, image.as_deref()),
    }
    result
}

/// Applies a partial update and returns the updated post together with the
/// image it replaced, if any.
fn apply_changes(
    conn: &Connection,
    post_id: i64,
    changes: &PostChanges,
    image: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(PostWithTags, Option<String>), ContentError> {
    let state = posts_db_operations::read_post_state(conn, post_id)?.ok_or_else(|| post_not_found(post_id))?;

    let target = changes.status.unwrap_or(state.status);
    state
        .status
        .transition_to(target)
        .map_err(|e| ContentError::invalid("status", e.to_string()))?;

    if let Some(category_id) = changes.category_id {
        ensure_category(conn, category_id)?;
    }

    let mut updates = ColumnUpdates::new();
    if let Some(title) = &changes.title {
        updates.set("title", title.clone());
    }
    if let Some(content) = &changes.content {
        updates.set("content", content.clone());
    }
    if let Some(excerpt) = &changes.excerpt {
        updates.set("excerpt", excerpt.clone());
    }
    if let Some(category_id) = changes.category_id {
        updates.set("category_id", category_id);
    }
    if let Some(meta_title) = &changes.meta_title {
        updates.set("meta_title", meta_title.clone());
    }
    if let Some(meta_description) = &changes.meta_description {
        updates.set("meta_description", meta_description.clone());
    }
    if target != state.status {
        updates.set("status", target);
    }
    let published_at = resolve_published_at(target, state.published_at, changes.scheduled_publish, now);
    if published_at != state.published_at {
        updates.set("published_at", published_at);
    }
    if let Some(path) = image {
        updates.set("featured_image", path.to_string());
    }

    posts_db_operations::update_post_columns(conn, post_id, updates, now)?;

    if let Some(tags) = &changes.tags {
        tags_db_operations::replace_post_tags(conn, post_id, tags)?;
    }

    let replaced = if image.is_some() { state.featured_image } else { None };
    Ok((load_with_tags(conn, post_id)?, replaced))
}

/// Partially updates a post. The slug set at creation is kept even when
/// the title changes.
pub fn update_post(
    pool: &DbPool,
    media: &dyn MediaStore,
    post_id: i64,
    form: PostForm,
    image: Option<String>,
    now: DateTime<Utc>,
) -> Result<PostWithTags, ContentError> {
    let result = form.into_changes().and_then(|changes| {
        let mut conn = pool.get()?;
        with_transaction(&mut conn, |tx| apply_changes(tx, post_id, &changes, image.as_deref(), now))
    });

    match result {
        Ok((updated, replaced)) => {
            log::info!("Updated post {}.", post_id);
            if let Some(old) = replaced {
                if let Err(e) = media.delete(&old) {
                    log::warn!("Post {} updated but old image {} could not be removed: {}", post_id, old, e);
                }
            }
            Ok(updated)
        }
        Err(e) => {
            discard_upload(media, image.as_deref());
            Err(e)
        }
    }
}

/// Soft delete: the row stays, its status becomes `archived` and
/// `published_at` is kept for the audit trail.
pub fn archive_post(pool: &DbPool, post_id: i64, now: DateTime<Utc>) -> Result<Post, ContentError> {
    let mut conn = pool.get()?;
    let post = with_transaction(&mut conn, |tx| {
        let state = posts_db_operations::read_post_state(tx, post_id)?.ok_or_else(|| post_not_found(post_id))?;
        let target = state
            .status
            .transition_to(PostStatus::Archived)
            .map_err(|e| ContentError::invalid("status", e.to_string()))?;

        if target != state.status {
            let mut updates = ColumnUpdates::new();
            updates.set("status", target);
            posts_db_operations::update_post_columns(tx, post_id, updates, now)?;
        }
        posts_db_operations::read_post_by_id(tx, post_id)?.ok_or_else(|| post_not_found(post_id))
    })?;

    log::info!("Archived post {}.", post_id);
    Ok(post)
}
