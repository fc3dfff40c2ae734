use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::services::CounterKind;

use super::FeedHandlerState;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterOp {
    Incr,
    Decr,
}

#[get("/posts/{post_id}/counts")]
pub async fn get_post_counts(
    path: web::Path<Uuid>,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let post_id = path.into_inner();
    let likes = state.counters.get(post_id, CounterKind::Likes).await?;
    let comments = state.counters.get(post_id, CounterKind::Comments).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "post_id": post_id,
        "likes_count": likes,
        "comments_count": comments,
    })))
}

/// Called by the content service after it updated the post row.
#[post("/posts/{post_id}/counters/{kind}/{op}")]
pub async fn adjust_counter(
    path: web::Path<(Uuid, CounterKind, CounterOp)>,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let (post_id, kind, op) = path.into_inner();
    let value = match op {
        CounterOp::Incr => state.counters.incr(post_id, kind).await?,
        CounterOp::Decr => state.counters.decr(post_id, kind).await?,
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "post_id": post_id,
        "counter": kind.attr(),
        "value": value,
    })))
}
