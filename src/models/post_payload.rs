//! Request bodies for creating and editing posts.
//!
//! A [`PostForm`] is what arrives over the wire, from JSON or from the text
//! parts of a multipart upload. It is validated and sanitized into a
//! [`NewPost`] or [`PostChanges`] before any connection is checked out.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::errors::{ContentError, FieldError};
use crate::helper::sanitization_helpers::{sanitize_markdown_content, strip_all_html};
use crate::helper::slug_helpers::slugify;
use crate::models::PostStatus;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_EXCERPT_CHARS: usize = 500;
pub const MAX_META_TITLE_CHARS: usize = 70;
pub const MAX_META_DESCRIPTION_CHARS: usize = 160;
pub const MAX_TAG_CHARS: usize = 50;
pub const MAX_TAGS: usize = 20;

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Accepts `"rust, actix"` as well as `["rust", "actix"]`. `null` counts as
/// absent.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    Ok(match Option::<StringOrVec>::deserialize(deserializer)? {
        Some(StringOrVec::String(s)) => Some(split_tags(&s)),
        Some(StringOrVec::Vec(v)) => Some(v),
        None => None,
    })
}

/// Distinguishes an explicit `null` (clear the value) from an absent key.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PostForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub category_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Option<Vec<String>>,
    pub status: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub scheduled_publish: Option<String>,
}

/// A validated create request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub category_id: Option<i64>,
    pub tags: Vec<String>,
    pub status: PostStatus,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub scheduled_publish: Option<DateTime<Utc>>,
}

/// A validated partial update. `None` leaves the column untouched; for the
/// nullable columns `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<Option<String>>,
    pub category_id: Option<Option<i64>>,
    pub tags: Option<Vec<String>>,
    pub status: Option<PostStatus>,
    pub meta_title: Option<Option<String>>,
    pub meta_description: Option<Option<String>>,
    pub scheduled_publish: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339 or the `YYYY-MM-DDTHH:MM` form of an HTML
/// `datetime-local` input, read as UTC.
pub fn parse_schedule(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    fn new() -> Self {
        Validator { errors: Vec::new() }
    }

    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn title(&mut self, raw: &str) -> String {
        let title = strip_all_html(raw);
        if title.is_empty() {
            self.fail("title", "Title is required.");
        } else if title.chars().count() > MAX_TITLE_CHARS {
            self.fail("title", format!("Title cannot exceed {} characters.", MAX_TITLE_CHARS));
        }
        title
    }

    fn content(&mut self, raw: &str) -> String {
        if raw.trim().is_empty() {
            self.fail("content", "Content is required.");
        }
        sanitize_markdown_content(raw)
    }

    /// Plain-text optional field: blank means "no value".
    fn optional_text(&mut self, field: &str, raw: &str, max: usize) -> Option<String> {
        let text = strip_all_html(raw);
        if text.chars().count() > max {
            self.fail(field, format!("{} cannot exceed {} characters.", field, max));
        }
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn category_id(&mut self, id: Option<i64>) -> Option<i64> {
        if let Some(id) = id {
            if id <= 0 {
                self.fail("category_id", "Category id must be a positive integer.");
            }
        }
        id
    }

    fn tags(&mut self, raw: &[String]) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in raw {
            let name = strip_all_html(tag);
            if name.is_empty() {
                continue;
            }
            if name.chars().count() > MAX_TAG_CHARS {
                self.fail("tags", format!("Tag '{}' exceeds {} characters.", name, MAX_TAG_CHARS));
                continue;
            }
            if slugify(&name).is_empty() {
                self.fail("tags", format!("Tag '{}' must contain a letter or digit.", name));
                continue;
            }
            let key = name.to_lowercase();
            if !tags.iter().any(|t| t.to_lowercase() == key) {
                tags.push(name);
            }
        }
        if tags.len() > MAX_TAGS {
            self.fail("tags", format!("A post can carry at most {} tags.", MAX_TAGS));
        }
        tags
    }

    fn status(&mut self, raw: &str) -> Option<PostStatus> {
        match raw.parse::<PostStatus>() {
            Ok(status) => Some(status),
            Err(e) => {
                self.fail("status", e.to_string());
                None
            }
        }
    }

    fn schedule(&mut self, raw: &str) -> Option<DateTime<Utc>> {
        if raw.trim().is_empty() {
            return None;
        }
        let parsed = parse_schedule(raw);
        if parsed.is_none() {
            self.fail("scheduled_publish", "Scheduled time must be an RFC 3339 timestamp.");
        }
        parsed
    }

    fn finish<T>(self, value: T) -> Result<T, ContentError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ContentError::ValidationFailed(self.errors))
        }
    }
}

impl PostForm {
    /// Builds a form from multipart text parts. `tags` may repeat and each
    /// occurrence may itself be comma separated.
    pub fn from_fields<I>(fields: I) -> Result<Self, ContentError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut form = PostForm::default();
        let mut errors = Vec::new();

        for (name, value) in fields {
            match name.as_str() {
                "title" => form.title = Some(value),
                "content" => form.content = Some(value),
                "excerpt" => form.excerpt = Some(value),
                "status" => form.status = Some(value),
                "meta_title" => form.meta_title = Some(value),
                "meta_description" => form.meta_description = Some(value),
                "scheduled_publish" => form.scheduled_publish = Some(value),
                "tags" | "tags[]" => form.tags.get_or_insert_with(Vec::new).extend(split_tags(&value)),
                "category_id" => {
                    let trimmed = value.trim();
                    if trimmed.is_empty() || trimmed == "null" {
                        form.category_id = Some(None);
                    } else {
                        match trimmed.parse::<i64>() {
                            Ok(id) => form.category_id = Some(Some(id)),
                            Err(_) => errors.push(FieldError::new("category_id", "Category id must be an integer.")),
                        }
                    }
                }
                other => log::debug!("Ignoring unknown form field '{}'.", other),
            }
        }

        if errors.is_empty() {
            Ok(form)
        } else {
            Err(ContentError::ValidationFailed(errors))
        }
    }

    pub fn into_new_post(self) -> Result<NewPost, ContentError> {
        let mut v = Validator::new();

        let title = v.title(self.title.as_deref().unwrap_or_default());
        let slug = slugify(&title);
        if !title.is_empty() && slug.is_empty() {
            v.fail("title", "Title must contain at least one letter or digit.");
        }
        let content = v.content(self.content.as_deref().unwrap_or_default());
        let excerpt = self.excerpt.as_deref().and_then(|s| v.optional_text("excerpt", s, MAX_EXCERPT_CHARS));
        let category_id = v.category_id(self.category_id.flatten());
        let tags = v.tags(self.tags.as_deref().unwrap_or_default());
        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => v.status(raw).unwrap_or(PostStatus::Draft),
            None => PostStatus::Draft,
        };
        if status == PostStatus::Archived {
            v.fail("status", "A new post must be a draft or published.");
        }
        let meta_title = self
            .meta_title
            .as_deref()
            .and_then(|s| v.optional_text("meta_title", s, MAX_META_TITLE_CHARS));
        let meta_description = self
            .meta_description
            .as_deref()
            .and_then(|s| v.optional_text("meta_description", s, MAX_META_DESCRIPTION_CHARS));
        let scheduled_publish = self.scheduled_publish.as_deref().and_then(|s| v.schedule(s));

        v.finish(NewPost {
            title,
            slug,
            content,
            excerpt,
            category_id,
            tags,
            status,
            meta_title,
            meta_description,
            scheduled_publish,
        })
    }

    pub fn into_changes(self) -> Result<PostChanges, ContentError> {
        let mut v = Validator::new();

        let changes = PostChanges {
            title: self.title.as_deref().map(|s| v.title(s)),
            content: self.content.as_deref().map(|s| v.content(s)),
            excerpt: self
                .excerpt
                .as_deref()
                .map(|s| v.optional_text("excerpt", s, MAX_EXCERPT_CHARS)),
            category_id: self.category_id.map(|id| v.category_id(id)),
            tags: self.tags.as_deref().map(|t| v.tags(t)),
            status: self
                .status
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .and_then(|s| v.status(s)),
            meta_title: self
                .meta_title
                .as_deref()
                .map(|s| v.optional_text("meta_title", s, MAX_META_TITLE_CHARS)),
            meta_description: self
                .meta_description
                .as_deref()
                .map(|s| v.optional_text("meta_description", s, MAX_META_DESCRIPTION_CHARS)),
            scheduled_publish: self.scheduled_publish.as_deref().and_then(|s| v.schedule(s)),
        };

        v.finish(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn field_names(err: ContentError) -> Vec<String> {
        match err {
            ContentError::ValidationFailed(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn json_accepts_comma_string_or_array_tags() {
        let a: PostForm = serde_json::from_str(r#"{"tags": "rust, actix ,"}"#).unwrap();
        let b: PostForm = serde_json::from_str(r#"{"tags": ["rust", "actix"]}"#).unwrap();
        assert_eq!(a.tags, Some(vec!["rust".to_string(), "actix".to_string()]));
        assert_eq!(a.tags, b.tags);

        let absent: PostForm = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.tags, None);
    }

    #[test]
    fn null_category_clears_while_absent_keeps() {
        let cleared: PostForm = serde_json::from_str(r#"{"category_id": null}"#).unwrap();
        let absent: PostForm = serde_json::from_str("{}").unwrap();
        assert_eq!(cleared.category_id, Some(None));
        assert_eq!(absent.category_id, None);
    }

    #[test]
    fn new_post_is_sanitized_and_slugged() {
        let form = PostForm {
            title: Some("<em>Tips</em> & Tricks".into()),
            content: Some("Hello <script>x</script>".into()),
            tags: Some(vec!["Rust".into(), "rust".into(), "<b>Web</b>".into()]),
            status: Some("published".into()),
            scheduled_publish: Some("2030-01-02T03:04".into()),
            ..PostForm::default()
        };
        let post = form.into_new_post().unwrap();

        assert_eq!(post.title, "Tips & Tricks");
        assert_eq!(post.slug, "tips-tricks");
        assert!(post.content.contains("&lt;script&gt;"));
        assert_eq!(post.tags, vec!["Rust", "Web"]);
        assert_eq!(post.status, PostStatus::Published);
        assert_eq!(post.scheduled_publish, Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 0).unwrap()));
    }

    #[test]
    fn new_post_collects_every_field_error() {
        let form = PostForm {
            title: Some("   ".into()),
            status: Some("deleted".into()),
            meta_title: Some("x".repeat(71)),
            scheduled_publish: Some("next tuesday".into()),
            ..PostForm::default()
        };
        let fields = field_names(form.into_new_post().unwrap_err());
        assert_eq!(fields, vec!["title", "content", "status", "meta_title", "scheduled_publish"]);
    }

    #[test]
    fn symbol_only_title_is_rejected() {
        let form = PostForm { title: Some("???".into()), content: Some("body".into()), ..PostForm::default() };
        assert_eq!(field_names(form.into_new_post().unwrap_err()), vec!["title"]);
    }

    #[test]
    fn new_posts_cannot_start_archived() {
        let form = PostForm {
            title: Some("Old news".into()),
            content: Some("body".into()),
            status: Some("archived".into()),
            ..PostForm::default()
        };
        assert_eq!(field_names(form.into_new_post().unwrap_err()), vec!["status"]);
    }

    #[test]
    fn too_many_tags_are_rejected() {
        let tags = (0..=MAX_TAGS).map(|i| format!("tag{}", i)).collect();
        let form = PostForm { tags: Some(tags), ..PostForm::default() };
        assert_eq!(field_names(form.into_changes().unwrap_err()), vec!["tags"]);
    }

    #[test]
    fn changes_only_carry_supplied_fields() {
        let form = PostForm { excerpt: Some("".into()), status: Some("Archived".into()), ..PostForm::default() };
        let changes = form.into_changes().unwrap();

        assert_eq!(changes.excerpt, Some(None));
        assert_eq!(changes.status, Some(PostStatus::Archived));
        assert_eq!(changes.title, None);
        assert_eq!(changes.tags, None);
        assert_eq!(PostForm::default().into_changes().unwrap(), PostChanges::default());
    }

    #[test]
    fn multipart_fields_build_a_form() {
        let fields = vec![
            ("title".to_string(), "Hello".to_string()),
            ("tags".to_string(), "a, b".to_string()),
            ("tags".to_string(), "c".to_string()),
            ("category_id".to_string(), "".to_string()),
            ("csrf".to_string(), "ignored".to_string()),
        ];
        let form = PostForm::from_fields(fields).unwrap();
        assert_eq!(form.title.as_deref(), Some("Hello"));
        assert_eq!(form.tags, Some(vec!["a".to_string(), "b".to_string(), "c".to_string()]));
        assert_eq!(form.category_id, Some(None));

        let bad = PostForm::from_fields(vec![("category_id".to_string(), "seven".to_string())]);
        assert_eq!(field_names(bad.unwrap_err()), vec!["category_id"]);
    }
}
