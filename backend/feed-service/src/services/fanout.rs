//! Fanout on write
//!
//! Post creation writes the author's own feed entry inline and hands the
//! rest to a [`FanoutDispatcher`]:
//!
//! 1. `ResolveAudience` loads the author's followers and splits them into
//!    `Batch` jobs of `batch_size` viewers.
//! 2. Each `Batch` is one bulk insert followed by a best-effort push of the
//!    new entries into the viewers' cached lists.
//!
//! Every job can be re-run from scratch. The store's (viewer, post)
//! uniqueness turns repeated inserts into no-ops, and viewers whose rows
//! already existed get their cached list dropped instead of pushed to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{FeedStore, SocialGraph};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{fanout_timestamp, FeedEntry, NewFeedEntry, PostRef};

use super::NewsFeedService;

/// Cache pushes in flight per batch
const CONCURRENT_MIRRORS: usize = 32;

/// A post whose audience still has to be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutPost {
    pub post_id: Uuid,
    pub author_id: Uuid,
    /// Feed timestamp shared by every recipient
    pub fanout_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutBatch {
    pub post_id: Uuid,
    pub fanout_at: DateTime<Utc>,
    pub follower_ids: Vec<Uuid>,
    pub batch_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanoutJob {
    ResolveAudience(FanoutPost),
    Batch(FanoutBatch),
}

impl FanoutJob {
    pub fn kind(&self) -> &'static str {
        match self {
            FanoutJob::ResolveAudience(_) => "resolve_audience",
            FanoutJob::Batch(_) => "batch",
        }
    }

    pub fn post_id(&self) -> Uuid {
        match self {
            FanoutJob::ResolveAudience(post) => post.post_id,
            FanoutJob::Batch(batch) => batch.post_id,
        }
    }
}

/// Accepts deferred fanout work. `dispatch` returns once the job is queued.
#[async_trait]
pub trait FanoutDispatcher: Send + Sync {
    async fn dispatch(&self, job: FanoutJob) -> Result<()>;
}

/// Outcome of announcing a post to the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnouncedPost {
    /// The author's own feed entry
    pub entry: FeedEntry,
    /// `false` when the post had been announced before
    pub first_announcement: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutPlan {
    pub followers: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Rows newly written by this run
    pub inserted: usize,
    /// Viewers that already had the entry
    pub skipped_existing: usize,
    /// New entries pushed onto an existing cached list
    pub mirrored: usize,
    /// Pushes or invalidations that failed and were swallowed
    pub mirror_failures: usize,
}

#[derive(Clone)]
pub struct FanoutEngine {
    store: Arc<dyn FeedStore>,
    graph: Arc<dyn SocialGraph>,
    feeds: NewsFeedService,
    batch_size: usize,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn FeedStore>,
        graph: Arc<dyn SocialGraph>,
        feeds: NewsFeedService,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            graph,
            feeds,
            batch_size: batch_size.max(1),
        }
    }

    /// Make a new post visible to its author now and to followers later.
    ///
    /// Returns the author's feed entry once it is stored and the audience
    /// job is queued. A re-announced post keeps its first entry and is
    /// reported as such, so callers can skip their own cache pushes.
    pub async fn on_post_created(
        &self,
        post: &PostRef,
        dispatcher: &dyn FanoutDispatcher,
    ) -> Result<AnnouncedPost> {
        let fanout_at = fanout_timestamp();
        let entry = self
            .store
            .create_feed_entry(NewFeedEntry {
                viewer_id: post.author_id,
                post_id: post.id,
                created_at: fanout_at,
            })
            .await?;

        let first_announcement = entry.created_at == fanout_at;
        if first_announcement {
            self.mirror(&entry).await;
        } else {
            // Post was announced before; keep its first timestamp
            debug!(post_id = %post.id, "Author entry already existed");
            self.drop_cached_lists(&[entry.viewer_id]).await;
        }

        dispatcher
            .dispatch(FanoutJob::ResolveAudience(FanoutPost {
                post_id: post.id,
                author_id: post.author_id,
                fanout_at: entry.created_at,
            }))
            .await?;

        info!(post_id = %post.id, author_id = %post.author_id, "Post fanout scheduled");
        Ok(AnnouncedPost {
            entry,
            first_announcement,
        })
    }

    /// Resolve the audience of `post` and queue one batch job per chunk.
    ///
    /// Follower lookup failures are returned as `AppError::Graph` so the
    /// whole job is retried.
    pub async fn fan_out_to_followers(
        &self,
        post: &FanoutPost,
        dispatcher: &dyn FanoutDispatcher,
    ) -> Result<FanoutPlan> {
        let follower_ids = self
            .graph
            .get_follower_ids(post.author_id)
            .await
            .map_err(|e| match e {
                AppError::Graph(_) => e,
                other => AppError::Graph(other.to_string()),
            })?;

        let mut seen = HashSet::with_capacity(follower_ids.len());
        let audience: Vec<Uuid> = follower_ids
            .into_iter()
            .filter(|id| *id != post.author_id && seen.insert(*id))
            .collect();

        let mut batches = 0;
        for (batch_index, chunk) in audience.chunks(self.batch_size).enumerate() {
            dispatcher
                .dispatch(FanoutJob::Batch(FanoutBatch {
                    post_id: post.post_id,
                    fanout_at: post.fanout_at,
                    follower_ids: chunk.to_vec(),
                    batch_index,
                }))
                .await?;
            batches += 1;
        }

        info!(
            post_id = %post.post_id,
            followers = audience.len(),
            batches,
            "Fanout batches dispatched"
        );
        Ok(FanoutPlan {
            followers: audience.len(),
            batches,
        })
    }

    /// Write one batch of follower entries and mirror them into the cache.
    pub async fn process_batch(&self, batch: &FanoutBatch) -> Result<BatchReport> {
        let entries: Vec<NewFeedEntry> = batch
            .follower_ids
            .iter()
            .map(|viewer_id| NewFeedEntry {
                viewer_id: *viewer_id,
                post_id: batch.post_id,
                created_at: batch.fanout_at,
            })
            .collect();

        let inserted = match self.store.bulk_create_feed_entries(&entries).await {
            Ok(rows) => rows,
            Err(e) => {
                metrics::record_fanout_batch("error");
                return Err(e);
            }
        };

        let inserted_viewers: HashSet<Uuid> = inserted.iter().map(|e| e.viewer_id).collect();
        let mut existing: Vec<Uuid> = batch
            .follower_ids
            .iter()
            .copied()
            .filter(|id| !inserted_viewers.contains(id))
            .collect();
        existing.sort_unstable();
        existing.dedup();

        let mut report = BatchReport {
            inserted: inserted.len(),
            skipped_existing: existing.len(),
            ..BatchReport::default()
        };

        // Owned entries keep the batch future Send for the worker pool
        let feeds = self.feeds.clone();
        let pushes: Vec<(Uuid, Result<bool>)> = stream::iter(inserted.iter().cloned())
            .map(move |entry| {
                let feeds = feeds.clone();
                async move {
                    let pushed = feeds.push_newsfeed_to_cache(&entry).await;
                    (entry.viewer_id, pushed)
                }
            })
            .buffer_unordered(CONCURRENT_MIRRORS)
            .collect()
            .await;

        for (viewer_id, pushed) in pushes {
            match pushed {
                Ok(true) => report.mirrored += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(viewer_id = %viewer_id, post_id = %batch.post_id, error = %e, "Cache mirror failed");
                    metrics::record_mirror_failure("newsfeed");
                    report.mirror_failures += 1;
                }
            }
        }

        if !existing.is_empty() {
            // An earlier attempt may already have pushed these entries
            if !self.drop_cached_lists(&existing).await {
                report.mirror_failures += existing.len();
            }
        }

        metrics::record_fanout_batch("success");
        metrics::record_entries_created(report.inserted);
        metrics::record_conflicts(report.skipped_existing);
        debug!(
            post_id = %batch.post_id,
            batch_index = batch.batch_index,
            inserted = report.inserted,
            skipped = report.skipped_existing,
            mirrored = report.mirrored,
            "Fanout batch written"
        );
        Ok(report)
    }

    /// Remove a deleted post from every feed and drop the affected lists.
    pub async fn remove_post(&self, post_id: Uuid) -> Result<usize> {
        let viewers = self.store.delete_feed_entries_for_post(post_id).await?;
        if !viewers.is_empty() {
            self.drop_cached_lists(&viewers).await;
        }
        info!(post_id = %post_id, viewers = viewers.len(), "Post removed from feeds");
        Ok(viewers.len())
    }

    pub async fn run_job(&self, job: &FanoutJob, dispatcher: &dyn FanoutDispatcher) -> Result<()> {
        match job {
            FanoutJob::ResolveAudience(post) => {
                self.fan_out_to_followers(post, dispatcher).await?;
            }
            FanoutJob::Batch(batch) => {
                self.process_batch(batch).await?;
            }
        }
        Ok(())
    }

    async fn mirror(&self, entry: &FeedEntry) {
        if let Err(e) = self.feeds.push_newsfeed_to_cache(entry).await {
            warn!(viewer_id = %entry.viewer_id, post_id = %entry.post_id, error = %e, "Cache mirror failed");
            metrics::record_mirror_failure("newsfeed");
        }
    }

    /// Returns `false` when the invalidation failed; it is never fatal.
    async fn drop_cached_lists(&self, viewers: &[Uuid]) -> bool {
        match self.feeds.invalidate_users(viewers).await {
            Ok(()) => true,
            Err(_) => {
                metrics::record_mirror_failure("newsfeed");
                false
            }
        }
    }
}
