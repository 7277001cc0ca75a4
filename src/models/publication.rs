use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("A post cannot move from '{from}' to '{to}'.")]
pub struct InvalidTransition {
    pub from: PostStatus,
    pub to: PostStatus,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown post status '{0}'. Use draft, published or archived.")]
pub struct UnknownStatus(pub String);

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Archived => "archived",
        }
    }

    /// Re-drafting is not modelled: nothing leaves `published` or `archived`
    /// except `published -> archived`.
    pub fn can_transition_to(self, next: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, next),
            (Draft, Draft)
                | (Published, Published)
                | (Archived, Archived)
                | (Draft, Published)
                | (Draft, Archived)
                | (Published, Archived)
        )
    }

    pub fn transition_to(self, next: PostStatus) -> Result<PostStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(PostStatus::Draft),
            "published" => Ok(PostStatus::Published),
            "archived" => Ok(PostStatus::Archived),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql for PostStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PostStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: UnknownStatus| FromSqlError::Other(Box::new(e)))
    }
}

/// Computes the `published_at` value a post should carry after a write.
///
/// An existing timestamp is always kept, so archiving or re-saving a
/// published post never moves it. A post reaching `published` for the
/// first time gets the scheduled time when one was supplied, otherwise `now`.
pub fn resolve_published_at(
    target: PostStatus,
    current: Option<DateTime<Utc>>,
    scheduled: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (current, target) {
        (Some(existing), _) => Some(existing),
        (None, PostStatus::Published) => Some(scheduled.unwrap_or(now)),
        (None, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn allowed_transitions() {
        assert!(PostStatus::Draft.can_transition_to(PostStatus::Published));
        assert!(PostStatus::Draft.can_transition_to(PostStatus::Archived));
        assert!(PostStatus::Published.can_transition_to(PostStatus::Archived));
        assert!(PostStatus::Published.can_transition_to(PostStatus::Published));
    }

    #[test]
    fn nothing_returns_to_draft() {
        assert_eq!(
            PostStatus::Published.transition_to(PostStatus::Draft),
            Err(InvalidTransition { from: PostStatus::Published, to: PostStatus::Draft })
        );
        assert!(PostStatus::Archived.transition_to(PostStatus::Draft).is_err());
        assert!(PostStatus::Archived.transition_to(PostStatus::Published).is_err());
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Published".parse::<PostStatus>(), Ok(PostStatus::Published));
        assert_eq!(" draft ".parse::<PostStatus>(), Ok(PostStatus::Draft));
        assert!("deleted".parse::<PostStatus>().is_err());
    }

    #[test]
    fn first_publication_uses_now_or_schedule() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let scheduled = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();

        assert_eq!(resolve_published_at(PostStatus::Published, None, None, now), Some(now));
        assert_eq!(
            resolve_published_at(PostStatus::Published, None, Some(scheduled), now),
            Some(scheduled)
        );
    }

    #[test]
    fn existing_timestamp_is_never_replaced() {
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert_eq!(resolve_published_at(PostStatus::Published, Some(first), Some(now), now), Some(first));
        assert_eq!(resolve_published_at(PostStatus::Archived, Some(first), None, now), Some(first));
    }

    #[test]
    fn drafts_and_direct_archives_stay_unpublished() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(resolve_published_at(PostStatus::Draft, None, Some(now), now), None);
        assert_eq!(resolve_published_at(PostStatus::Archived, None, None, now), None);
    }
}
