use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{FeedQuery, PostStore};
use crate::error::Result;
use crate::models::{PostCounts, PostRef};

#[derive(Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn query_user_posts(&self, author_id: Uuid, query: FeedQuery) -> Result<Vec<PostRef>> {
        let rows = sqlx::query_as::<_, PostRef>(
            r#"
            SELECT id, author_id, created_at
            FROM posts
            WHERE author_id = $1
                AND deleted_at IS NULL
                AND ($2::timestamptz IS NULL OR created_at < $2)
                AND ($3::timestamptz IS NULL OR created_at > $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(author_id)
        .bind(query.before)
        .bind(query.after)
        .bind(query.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn load_post_counts(&self, post_id: Uuid) -> Result<Option<PostCounts>> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT likes_count, comments_count
            FROM posts
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(likes_count, comments_count)| PostCounts {
            likes_count,
            comments_count,
        }))
    }
}
