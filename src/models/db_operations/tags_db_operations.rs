use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

use super::{is_unique_violation, DbError};
use crate::helper::slug_helpers::slugify;
use crate::models::{Tag, TagWithCount};

fn find_tag_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<Tag>> {
    conn.query_row(
        "SELECT id, name, slug FROM tags WHERE name = ?1 COLLATE NOCASE",
        [name],
        |row| Ok(Tag { id: row.get(0)?, name: row.get(1)?, slug: row.get(2)? }),
    )
    .optional()
}

fn find_tag_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<Tag>> {
    conn.query_row(
        "SELECT id, name, slug FROM tags WHERE slug = ?1",
        [slug],
        |row| Ok(Tag { id: row.get(0)?, name: row.get(1)?, slug: row.get(2)? }),
    )
    .optional()
}

/// Attempts at finding a free slug before the insert gives up.
const MAX_SLUG_ATTEMPTS: u32 = 50;

fn slug_candidate(base: &str, attempt: u32) -> String {
    if attempt == 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

/// Returns the tag whose name matches `name` ignoring case, creating it when
/// none exists.
///
/// The lookup is only a fast path. Two writers can both miss it, so the
/// UNIQUE constraints on `tags.name` and `tags.slug` decide: the loser of the
/// insert re-reads the row the winner created. A different name whose slug
/// is already taken ("C++" next to "C") gets its own tag with a numbered
/// slug (`c-2`).
pub fn resolve_or_create_tag(conn: &Connection, name: &str) -> Result<Tag, DbError> {
    let name = name.trim();
    if let Some(tag) = find_tag_by_name(conn, name)? {
        return Ok(tag);
    }

    let base = slugify(name);
    for attempt in 1..=MAX_SLUG_ATTEMPTS {
        let slug = slug_candidate(&base, attempt);
        if find_tag_by_slug(conn, &slug)?.is_some() {
            continue;
        }
        match conn.execute("INSERT INTO tags (name, slug) VALUES (?1, ?2)", params![name, slug]) {
            Ok(_) => return Ok(Tag { id: conn.last_insert_rowid(), name: name.to_string(), slug }),
            Err(e) if is_unique_violation(&e) => {
                log::warn!("Tag '{}' collided on insert with slug '{}'; re-reading it.", name, slug);
                if let Some(tag) = find_tag_by_name(conn, name)? {
                    return Ok(tag);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(DbError::Conflict(format!("No free slug for tag '{}' after {} attempts.", name, MAX_SLUG_ATTEMPTS)))
}

/// Replaces the post's whole tag set. Names are matched case-insensitively,
/// so `["Rust", "rust"]` yields a single link. Tag rows themselves are never
/// deleted here.
pub fn replace_post_tags(conn: &Connection, post_id: i64, names: &[String]) -> Result<Vec<Tag>, DbError> {
    conn.execute("DELETE FROM post_tags WHERE post_id = ?1", [post_id])?;

    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
            continue;
        }
        let tag = resolve_or_create_tag(conn, trimmed)?;
        conn.execute("INSERT INTO post_tags (post_id, tag_id) VALUES (?1, ?2)", params![post_id, tag.id])?;
        tags.push(tag);
    }
    Ok(tags)
}

pub fn read_tags_for_post(conn: &Connection, post_id: i64) -> Result<Vec<Tag>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.slug FROM tags t
         JOIN post_tags pt ON pt.tag_id = t.id
         WHERE pt.post_id = ?1
         ORDER BY t.name COLLATE NOCASE",
    )?;
    let tags = stmt
        .query_map([post_id], |row| Ok(Tag { id: row.get(0)?, name: row.get(1)?, slug: row.get(2)? }))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// Every tag with the number of live published posts carrying it.
pub fn read_tags_with_counts(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<TagWithCount>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.slug, COUNT(p.id)
         FROM tags t
         LEFT JOIN post_tags pt ON pt.tag_id = t.id
         LEFT JOIN posts p ON p.id = pt.post_id AND p.status = 'published' AND p.published_at <= ?1
         GROUP BY t.id, t.name, t.slug
         ORDER BY t.name COLLATE NOCASE",
    )?;
    let tags = stmt
        .query_map([now], |row| {
            Ok(TagWithCount {
                tag: Tag { id: row.get(0)?, name: row.get(1)?, slug: row.get(2)? },
                post_count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}
