/// Newsfeed repository
///
/// The UNIQUE (viewer_id, post_id) constraint is the only guard against
/// duplicate entries; every insert here resolves conflicts by keeping the
/// existing row.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

use super::{FeedQuery, FeedStore};
use crate::error::Result;
use crate::models::{FeedEntry, NewFeedEntry};

#[derive(Clone)]
pub struct PgFeedStore {
    pool: PgPool,
}

impl PgFeedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedStore for PgFeedStore {
    async fn create_feed_entry(&self, entry: NewFeedEntry) -> Result<FeedEntry> {
        let inserted = sqlx::query_as::<_, FeedEntry>(
            r#"
            INSERT INTO newsfeeds (viewer_id, post_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (viewer_id, post_id) DO NOTHING
            RETURNING id, viewer_id, post_id, created_at
            "#,
        )
        .bind(entry.viewer_id)
        .bind(entry.post_id)
        .bind(entry.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(viewer_id = %entry.viewer_id, post_id = %entry.post_id, "Failed to insert feed entry: {}", e);
            e
        })?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        debug!(
            viewer_id = %entry.viewer_id,
            post_id = %entry.post_id,
            "Feed entry already exists"
        );
        let existing = sqlx::query_as::<_, FeedEntry>(
            r#"
            SELECT id, viewer_id, post_id, created_at
            FROM newsfeeds
            WHERE viewer_id = $1 AND post_id = $2
            "#,
        )
        .bind(entry.viewer_id)
        .bind(entry.post_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(existing)
    }

    async fn bulk_create_feed_entries(&self, entries: &[NewFeedEntry]) -> Result<Vec<FeedEntry>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut viewer_ids: Vec<Uuid> = Vec::with_capacity(entries.len());
        let mut post_ids: Vec<Uuid> = Vec::with_capacity(entries.len());
        let mut created_ats: Vec<DateTime<Utc>> = Vec::with_capacity(entries.len());
        for entry in entries {
            viewer_ids.push(entry.viewer_id);
            post_ids.push(entry.post_id);
            created_ats.push(entry.created_at);
        }

        // One statement: either the whole batch is applied or none of it
        let rows = sqlx::query_as::<_, FeedEntry>(
            r#"
            INSERT INTO newsfeeds (viewer_id, post_id, created_at)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::timestamptz[])
            ON CONFLICT (viewer_id, post_id) DO NOTHING
            RETURNING id, viewer_id, post_id, created_at
            "#,
        )
        .bind(&viewer_ids)
        .bind(&post_ids)
        .bind(&created_ats)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(count = entries.len(), "Bulk feed insert failed: {}", e);
            e
        })?;

        Ok(rows)
    }

    async fn query_feed_entries(
        &self,
        viewer_id: Uuid,
        query: FeedQuery,
    ) -> Result<Vec<FeedEntry>> {
        // LIMIT NULL is LIMIT ALL in PostgreSQL
        let rows = sqlx::query_as::<_, FeedEntry>(
            r#"
            SELECT id, viewer_id, post_id, created_at
            FROM newsfeeds
            WHERE viewer_id = $1
                AND ($2::timestamptz IS NULL OR created_at < $2)
                AND ($3::timestamptz IS NULL OR created_at > $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(viewer_id)
        .bind(query.before)
        .bind(query.after)
        .bind(query.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn delete_feed_entries_for_post(&self, post_id: Uuid) -> Result<Vec<Uuid>> {
        let viewers = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM newsfeeds
            WHERE post_id = $1
            RETURNING viewer_id
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(viewers)
    }
}
