use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{PostRef, Timestamped};
use crate::pagination::{FeedCursor, Page};
use crate::services::{
    FanoutDispatcher, FanoutEngine, NewsFeedService, PostCounterService, TimelineService,
};

/// Header carrying the authenticated viewer, set by the gateway
pub const USER_ID_HEADER: &str = "X-User-Id";

#[derive(Debug, Deserialize)]
pub struct CursorParams {
    pub before: Option<String>,
    pub after: Option<String>,
}

impl CursorParams {
    fn cursor(&self) -> Result<FeedCursor> {
        FeedCursor::from_params(self.before.as_deref(), self.after.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct RemovePostParams {
    /// Author whose post list should also be dropped
    pub author_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub results: Vec<T>,
    pub has_next_page: bool,
    pub next_cursor: Option<String>,
    pub refresh_cursor: Option<String>,
}

impl<T: Timestamped> From<Page<T>> for PageResponse<T> {
    fn from(page: Page<T>) -> Self {
        let next_cursor = page.next_cursor();
        let refresh_cursor = page.refresh_cursor();
        Self {
            results: page.items,
            has_next_page: page.has_next_page,
            next_cursor,
            refresh_cursor,
        }
    }
}

pub struct FeedHandlerState {
    pub feeds: NewsFeedService,
    pub timeline: TimelineService,
    pub engine: FanoutEngine,
    pub counters: PostCounterService,
    pub dispatcher: Arc<dyn FanoutDispatcher>,
}

fn viewer_id(req: &HttpRequest) -> Result<Uuid> {
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest(format!("missing {} header", USER_ID_HEADER)))?;

    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("invalid {} header", USER_ID_HEADER)))
}

#[get("/newsfeeds")]
pub async fn get_newsfeeds(
    req: HttpRequest,
    query: web::Query<CursorParams>,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let viewer = viewer_id(&req)?;
    let cursor = query.cursor()?;

    let page = state.feeds.get_feed_page(viewer, cursor).await?;
    debug!(viewer_id = %viewer, count = page.items.len(), "Newsfeed page served");

    Ok(HttpResponse::Ok().json(PageResponse::from(page)))
}

#[get("/users/{user_id}/posts")]
pub async fn get_user_posts(
    path: web::Path<Uuid>,
    query: web::Query<CursorParams>,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let author = path.into_inner();
    let cursor = query.cursor()?;

    let page = state.timeline.get_user_posts_page(author, cursor).await?;
    Ok(HttpResponse::Ok().json(PageResponse::from(page)))
}

/// Called by the content service after a post is stored.
#[post("/posts")]
pub async fn create_post(
    body: web::Json<PostRef>,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let post = body.into_inner();

    let announced = state
        .engine
        .on_post_created(&post, state.dispatcher.as_ref())
        .await?;

    // A repeated announcement may already be in the author's list
    let mirrored = if announced.first_announcement {
        state.timeline.push_post_to_cache(&post).await.map(|_| ())
    } else {
        state.timeline.invalidate(post.author_id).await
    };
    if let Err(e) = mirrored {
        warn!(post_id = %post.id, error = %e, "Failed to update author post list");
    }

    Ok(HttpResponse::Accepted().json(announced.entry))
}

#[delete("/posts/{post_id}")]
pub async fn delete_post(
    path: web::Path<Uuid>,
    query: web::Query<RemovePostParams>,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let post_id = path.into_inner();
    let removed = state.engine.remove_post(post_id).await?;

    if let Some(author_id) = query.author_id {
        if let Err(e) = state.timeline.invalidate(author_id).await {
            warn!(author_id = %author_id, error = %e, "Failed to drop author post list");
        }
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "post_id": post_id,
        "removed": removed,
    })))
}
