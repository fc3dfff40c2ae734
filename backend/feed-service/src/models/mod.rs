use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Post `post_id` is visible in the feed of `viewer_id`.
///
/// `created_at` is assigned once when the fanout starts and shared by every
/// recipient; it is the sort key of the viewer's feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeedEntry {
    pub id: Uuid,
    pub viewer_id: Uuid,
    pub post_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeedEntry {
    pub viewer_id: Uuid,
    pub post_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The parts of a post the feed needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostRef {
    pub id: Uuid,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCounts {
    pub likes_count: i64,
    pub comments_count: i64,
}

/// Anything that can be ordered on a reverse-chronological feed.
pub trait Timestamped {
    fn created_at(&self) -> DateTime<Utc>;
}

impl Timestamped for FeedEntry {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Timestamped for PostRef {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Current time at PostgreSQL `timestamptz` precision.
///
/// Cache copies and store rows must compare equal, so nanoseconds are
/// dropped before the value is written anywhere.
pub fn fanout_timestamp() -> DateTime<Utc> {
    truncate_to_micros(Utc::now())
}

pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}
