use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::SocialGraph;
use crate::error::{AppError, Result};

/// Follower lookups against the `follows` read model
#[derive(Clone)]
pub struct PgSocialGraph {
    pool: PgPool,
}

impl PgSocialGraph {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SocialGraph for PgSocialGraph {
    async fn get_follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT follower_id
            FROM follows
            WHERE followee_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Graph(format!("follower lookup for {} failed: {}", user_id, e)))
    }
}
