//! Read-side SQL assembly for the post listing.
//!
//! Filters are folded into a [`SqlFilter`]: an ordered list of predicates,
//! each bound to exactly one positional parameter. The listing SELECT and its
//! COUNT are both rendered from the same `SqlFilter`, so the total always
//! describes the rows the page is cut from. Filter values only ever travel
//! as bound parameters; the sort column and direction are interpolated, but
//! only after being parsed into [`SortKey`] / [`SortOrder`].

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use serde::Deserialize;
use std::str::FromStr;

use crate::errors::FieldError;
use crate::models::PostStatus;

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 50;

/// Columns selected for every [`crate::models::Post`] row, in mapping order.
pub const POST_COLUMNS: &str = "p.id, p.title, p.slug, p.content, p.excerpt, p.category_id, c.name, c.slug, \
     p.author_id, u.username, p.featured_image, p.status, p.published_at, p.meta_title, \
     p.meta_description, p.views, p.created_at, p.updated_at";

pub const POST_FROM: &str =
    "FROM posts p LEFT JOIN categories c ON c.id = p.category_id LEFT JOIN users u ON u.id = p.author_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    CreatedAt,
    PublishedAt,
    Title,
    Views,
}

impl SortKey {
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "p.created_at",
            SortKey::PublishedAt => "p.published_at",
            SortKey::Title => "p.title",
            SortKey::Views => "p.views",
        }
    }
}

impl FromStr for SortKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(SortKey::CreatedAt),
            "published_at" => Ok(SortKey::PublishedAt),
            "title" => Ok(SortKey::Title),
            "views" => Ok(SortKey::Views),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(()),
        }
    }
}

/// Raw query string of `GET /api/posts`.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct PostListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
    pub tag: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

/// Validated, clamped listing filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFilters {
    pub status: PostStatus,
    pub category: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
    pub tag: Option<String>,
    pub sort: SortKey,
    pub order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

impl Default for PostFilters {
    fn default() -> Self {
        PostFilters {
            status: PostStatus::Published,
            category: None,
            author: None,
            search: None,
            tag: None,
            sort: SortKey::default(),
            order: SortOrder::default(),
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl PostFilters {
    pub fn from_query(query: &PostListQuery) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();

        let status = match non_blank(&query.status) {
            Some(s) => s.parse::<PostStatus>().unwrap_or_else(|e| {
                errors.push(FieldError::new("status", e.to_string()));
                PostStatus::Published
            }),
            None => PostStatus::Published,
        };

        let sort = match non_blank(&query.sort) {
            Some(s) => s.parse::<SortKey>().unwrap_or_else(|_| {
                errors.push(FieldError::new(
                    "sort",
                    "Sort must be one of created_at, published_at, title, views.",
                ));
                SortKey::default()
            }),
            None => SortKey::default(),
        };

        let order = match non_blank(&query.order) {
            Some(s) => s.parse::<SortOrder>().unwrap_or_else(|_| {
                errors.push(FieldError::new("order", "Order must be asc or desc."));
                SortOrder::default()
            }),
            None => SortOrder::default(),
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(PostFilters {
            status,
            category: non_blank(&query.category),
            author: non_blank(&query.author),
            search: non_blank(&query.search),
            tag: non_blank(&query.tag),
            sort,
            order,
            page: clamp_page(query.page),
            limit: clamp_limit(query.limit),
        })
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

pub fn clamp_page(page: Option<i64>) -> u32 {
    page.unwrap_or(1).clamp(1, u32::MAX as i64 / MAX_LIMIT as i64) as u32
}

pub fn clamp_limit(limit: Option<i64>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT as i64).clamp(1, MAX_LIMIT as i64) as u32
}

/// Escapes LIKE wildcards so user text matches literally, then wraps it for
/// a substring match. Pair with `ESCAPE '\'`.
pub fn like_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('%');
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Accumulated WHERE predicates with their positional parameters.
#[derive(Default)]
pub struct SqlFilter {
    predicates: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl SqlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one predicate bound to one new parameter. Every `{}` in
    /// `template` becomes the same `?N` placeholder.
    pub fn push<T: ToSql + 'static>(&mut self, template: &str, value: T) {
        self.params.push(Box::new(value));
        let placeholder = format!("?{}", self.params.len());
        self.predicates.push(template.replace("{}", &placeholder));
    }

    pub fn where_clause(&self) -> String {
        if self.predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.predicates.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Box<dyn ToSql>] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }
}

/// Adds the visibility predicates shared by every public read: the status
/// match and, for published posts, the `published_at <= now` cut-off that
/// hides scheduled posts.
pub fn push_visibility(filter: &mut SqlFilter, status: PostStatus, now: DateTime<Utc>) {
    filter.push("p.status = {}", status);
    if status == PostStatus::Published {
        filter.push("p.published_at <= {}", now);
    }
}

pub fn build_filter(filters: &PostFilters, now: DateTime<Utc>) -> SqlFilter {
    let mut filter = SqlFilter::new();
    push_visibility(&mut filter, filters.status, now);

    if let Some(category) = &filters.category {
        filter.push("c.slug = {}", category.to_lowercase());
    }
    if let Some(author) = &filters.author {
        filter.push("u.username LIKE {} ESCAPE '\\'", like_pattern(author));
    }
    if let Some(search) = &filters.search {
        filter.push(
            "(p.title LIKE {} ESCAPE '\\' OR p.excerpt LIKE {} ESCAPE '\\' OR p.content LIKE {} ESCAPE '\\')",
            like_pattern(search),
        );
    }
    if let Some(tag) = &filters.tag {
        filter.push(
            "EXISTS (SELECT 1 FROM post_tags pt JOIN tags t ON t.id = pt.tag_id \
             WHERE pt.post_id = p.id AND t.name = {} COLLATE NOCASE)",
            tag.clone(),
        );
    }
    filter
}

/// The listing SELECT and its COUNT, both rendered from one [`SqlFilter`].
///
/// `select_sql` takes the filter parameters followed by `limit` and `offset`;
/// `count_sql` takes the filter parameters alone.
pub struct PostListSql {
    pub select_sql: String,
    pub count_sql: String,
    pub filter: SqlFilter,
    pub limit: u32,
    pub offset: u32,
}

pub fn build_post_list_query(filters: &PostFilters, now: DateTime<Utc>) -> PostListSql {
    let filter = build_filter(filters, now);
    let where_clause = filter.where_clause();
    let n = filter.param_count();
    let direction = filters.order.keyword();

    let select_sql = format!(
        "SELECT {cols} {from}{where_clause} ORDER BY {sort} {dir}, p.id {dir} LIMIT ?{limit} OFFSET ?{offset}",
        cols = POST_COLUMNS,
        from = POST_FROM,
        where_clause = where_clause,
        sort = filters.sort.column(),
        dir = direction,
        limit = n + 1,
        offset = n + 2,
    );
    let count_sql = format!("SELECT COUNT(*) {}{}", POST_FROM, where_clause);

    PostListSql {
        select_sql,
        count_sql,
        filter,
        limit: filters.limit,
        offset: filters.offset(),
    }
}
