use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::query_builder::{build_post_list_query, push_visibility, PostFilters, SqlFilter, POST_COLUMNS, POST_FROM};
use super::DbError;
use crate::models::{Category, CategoryWithCount, Pagination, Post, PostStatus};

pub const RELATED_POSTS_LIMIT: u32 = 3;

fn map_post_row(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        content: row.get(3)?,
        excerpt: row.get(4)?,
        category_id: row.get(5)?,
        category_name: row.get(6)?,
        category_slug: row.get(7)?,
        author_id: row.get(8)?,
        author_name: row.get(9)?,
        featured_image: row.get(10)?,
        status: row.get(11)?,
        published_at: row.get(12)?,
        meta_title: row.get(13)?,
        meta_description: row.get(14)?,
        views: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

// ====================================================================
// ========================== READ OPERATIONS =========================
// ====================================================================

/// Runs the filtered listing: one COUNT and one windowed SELECT rendered
/// from the same predicate set.
pub fn list_posts(
    conn: &Connection,
    filters: &PostFilters,
    now: DateTime<Utc>,
) -> Result<(Vec<Post>, Pagination), DbError> {
    let sql = build_post_list_query(filters, now);

    let total: i64 = conn.query_row(
        &sql.count_sql,
        params_from_iter(sql.filter.params().iter()),
        |row| row.get(0),
    )?;

    let mut select_params: Vec<&dyn ToSql> = sql.filter.params().iter().map(|p| p.as_ref()).collect();
    select_params.push(&sql.limit);
    select_params.push(&sql.offset);

    let mut stmt = conn.prepare(&sql.select_sql)?;
    let posts = stmt
        .query_map(params_from_iter(select_params), map_post_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((posts, Pagination::new(filters.page, filters.limit, total.max(0) as u64)))
}

fn read_post_where<T: ToSql + 'static>(
    conn: &Connection,
    predicate: &str,
    value: T,
    include_hidden: bool,
    now: DateTime<Utc>,
) -> Result<Option<Post>, DbError> {
    let mut filter = SqlFilter::new();
    filter.push(predicate, value);
    if !include_hidden {
        push_visibility(&mut filter, PostStatus::Published, now);
    }

    let sql = format!("SELECT {} {}{}", POST_COLUMNS, POST_FROM, filter.where_clause());
    let post = conn
        .query_row(&sql, params_from_iter(filter.params().iter()), map_post_row)
        .optional()?;
    Ok(post)
}

/// Resolves a numeric id or a slug. An all-digit identifier that matches no
/// id is retried as a slug, so a post titled "2024" stays reachable. Unless
/// `include_hidden` is set, only live published posts are returned.
pub fn read_post_by_identifier(
    conn: &Connection,
    identifier: &str,
    include_hidden: bool,
    now: DateTime<Utc>,
) -> Result<Option<Post>, DbError> {
    if let Ok(id) = identifier.parse::<i64>() {
        if let Some(post) = read_post_where(conn, "p.id = {}", id, include_hidden, now)? {
            return Ok(Some(post));
        }
    }
    read_post_where(conn, "p.slug = {}", identifier.to_string(), include_hidden, now)
}

pub fn read_post_by_id(conn: &Connection, id: i64) -> Result<Option<Post>, DbError> {
    let sql = format!("SELECT {} {} WHERE p.id = ?1", POST_COLUMNS, POST_FROM);
    Ok(conn.query_row(&sql, [id], map_post_row).optional()?)
}

pub fn increment_views(conn: &Connection, post_id: i64) -> Result<(), DbError> {
    let updated = conn.execute("UPDATE posts SET views = views + 1 WHERE id = ?1", [post_id])?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("Post {} not found.", post_id)));
    }
    Ok(())
}

/// Newest live posts sharing the category, excluding the post itself.
pub fn read_related_posts(
    conn: &Connection,
    post: &Post,
    now: DateTime<Utc>,
) -> Result<Vec<Post>, DbError> {
    let category_id = match post.category_id {
        Some(id) => id,
        None => return Ok(Vec::new()),
    };

    let mut filter = SqlFilter::new();
    push_visibility(&mut filter, PostStatus::Published, now);
    filter.push("p.category_id = {}", category_id);
    filter.push("p.id <> {}", post.id);

    let sql = format!(
        "SELECT {} {}{} ORDER BY p.published_at DESC, p.id DESC LIMIT {}",
        POST_COLUMNS,
        POST_FROM,
        filter.where_clause(),
        RELATED_POSTS_LIMIT
    );
    let mut stmt = conn.prepare(&sql)?;
    let posts = stmt
        .query_map(params_from_iter(filter.params().iter()), map_post_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

pub fn read_categories_with_counts(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<CategoryWithCount>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.slug, COUNT(p.id)
         FROM categories c
         LEFT JOIN posts p ON p.category_id = c.id AND p.status = 'published' AND p.published_at <= ?1
         GROUP BY c.id, c.name, c.slug
         ORDER BY c.name COLLATE NOCASE",
    )?;
    let categories = stmt
        .query_map([now], |row| {
            Ok(CategoryWithCount {
                category: Category { id: row.get(0)?, name: row.get(1)?, slug: row.get(2)? },
                post_count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(categories)
}

// ====================================================================
// ========================= WRITE OPERATIONS =========================
// ====================================================================

/// The columns of an existing post the write path decides on.
#[derive(Debug, Clone)]
pub struct PostState {
    pub status: PostStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub featured_image: Option<String>,
}

pub fn read_post_state(conn: &Connection, post_id: i64) -> Result<Option<PostState>, DbError> {
    let state = conn
        .query_row(
            "SELECT status, published_at, featured_image FROM posts WHERE id = ?1",
            [post_id],
            |row| {
                Ok(PostState {
                    status: row.get(0)?,
                    published_at: row.get(1)?,
                    featured_image: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(state)
}

pub fn slug_exists(conn: &Connection, slug: &str) -> Result<bool, DbError> {
    let exists = conn.query_row("SELECT EXISTS(SELECT 1 FROM posts WHERE slug = ?1)", [slug], |row| row.get(0))?;
    Ok(exists)
}

pub fn category_exists(conn: &Connection, category_id: i64) -> Result<bool, DbError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE id = ?1)",
        [category_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn create_category(conn: &Connection, name: &str, slug: &str) -> Result<i64, DbError> {
    conn.execute("INSERT INTO categories (name, slug) VALUES (?1, ?2)", params![name, slug])?;
    Ok(conn.last_insert_rowid())
}

pub struct NewPostRow<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub content: &'a str,
    pub excerpt: Option<&'a str>,
    pub category_id: Option<i64>,
    pub author_id: i64,
    pub featured_image: Option<&'a str>,
    pub status: PostStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub meta_title: Option<&'a str>,
    pub meta_description: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// Inserts the row and returns its id. A slug collision surfaces as the
/// raw UNIQUE violation so the caller can map it.
pub fn insert_post(conn: &Connection, row: &NewPostRow) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO posts (title, slug, content, excerpt, category_id, author_id, featured_image,
                            status, published_at, meta_title, meta_description, views, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)",
        params![
            row.title,
            row.slug,
            row.content,
            row.excerpt,
            row.category_id,
            row.author_id,
            row.featured_image,
            row.status,
            row.published_at,
            row.meta_title,
            row.meta_description,
            row.now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Column assignments for a partial update. Only pushed columns are written.
#[derive(Default)]
pub struct ColumnUpdates {
    columns: Vec<&'static str>,
    params: Vec<Box<dyn ToSql>>,
}

impl ColumnUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: ToSql + 'static>(&mut self, column: &'static str, value: T) {
        self.columns.push(column);
        self.params.push(Box::new(value));
    }
}

/// Writes the given columns plus `updated_at`. Returns `NotFound` when no
/// row has the id.
pub fn update_post_columns(
    conn: &Connection,
    post_id: i64,
    mut updates: ColumnUpdates,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    updates.set("updated_at", now);

    let assignments: Vec<String> = updates
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect();
    let sql = format!(
        "UPDATE posts SET {} WHERE id = ?{}",
        assignments.join(", "),
        updates.params.len() + 1
    );

    let mut all_params: Vec<&dyn ToSql> = updates.params.iter().map(|p| p.as_ref()).collect();
    all_params.push(&post_id);

    let changed = conn.execute(&sql, params_from_iter(all_params))?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("Post {} not found.", post_id)));
    }
    Ok(())
}
