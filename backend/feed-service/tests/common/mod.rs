//! In-memory collaborators for feed-service integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use feed_cache::MemoryCacheBackend;
use feed_service::cache::BoundedListCache;
use feed_service::db::{FeedQuery, FeedStore, PostStore, SocialGraph};
use feed_service::error::{AppError, Result};
use feed_service::models::{FeedEntry, NewFeedEntry, PostCounts, PostRef};
use feed_service::services::{
    FanoutDispatcher, FanoutEngine, FanoutJob, NewsFeedService, TimelineService,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const LIST_LIMIT: usize = 1000;
pub const PAGE_SIZE: usize = 20;

pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Consume one unit of a "fail the next N calls" counter.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (DateTime<Utc>, Uuid),
{
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

/// Feed store enforcing the (viewer, post) uniqueness constraint
#[derive(Default)]
pub struct MemoryFeedStore {
    rows: Mutex<Vec<FeedEntry>>,
    pub query_calls: AtomicUsize,
    pub bulk_calls: AtomicUsize,
    fail_next_bulk: AtomicUsize,
    hang_next_bulk: AtomicUsize,
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_bulk_inserts(&self, n: usize) {
        self.fail_next_bulk.store(n, Ordering::SeqCst);
    }

    /// The next `n` bulk inserts never complete.
    pub fn hang_next_bulk_inserts(&self, n: usize) {
        self.hang_next_bulk.store(n, Ordering::SeqCst);
    }

    pub fn count(&self, viewer_id: Uuid, post_id: Uuid) -> usize {
        self.rows
            .lock()
            .iter()
            .filter(|r| r.viewer_id == viewer_id && r.post_id == post_id)
            .count()
    }

    pub fn feed_of(&self, viewer_id: Uuid) -> Vec<FeedEntry> {
        let mut rows: Vec<FeedEntry> = self
            .rows
            .lock()
            .iter()
            .filter(|r| r.viewer_id == viewer_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |r| (r.created_at, r.id));
        rows
    }

    pub fn queries(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn insert(&self, entry: &NewFeedEntry) -> Option<FeedEntry> {
        let mut rows = self.rows.lock();
        if rows
            .iter()
            .any(|r| r.viewer_id == entry.viewer_id && r.post_id == entry.post_id)
        {
            return None;
        }
        let row = FeedEntry {
            id: Uuid::new_v4(),
            viewer_id: entry.viewer_id,
            post_id: entry.post_id,
            created_at: entry.created_at,
        };
        rows.push(row.clone());
        Some(row)
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn create_feed_entry(&self, entry: NewFeedEntry) -> Result<FeedEntry> {
        if let Some(row) = self.insert(&entry) {
            return Ok(row);
        }
        let rows = self.rows.lock();
        rows.iter()
            .find(|r| r.viewer_id == entry.viewer_id && r.post_id == entry.post_id)
            .cloned()
            .ok_or_else(|| AppError::Internal("row vanished".into()))
    }

    async fn bulk_create_feed_entries(&self, entries: &[NewFeedEntry]) -> Result<Vec<FeedEntry>> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.hang_next_bulk) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.fail_next_bulk) {
            return Err(AppError::Internal("injected bulk insert failure".into()));
        }
        Ok(entries.iter().filter_map(|e| self.insert(e)).collect())
    }

    async fn query_feed_entries(
        &self,
        viewer_id: Uuid,
        query: FeedQuery,
    ) -> Result<Vec<FeedEntry>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<FeedEntry> = self
            .feed_of(viewer_id)
            .into_iter()
            .filter(|r| query.before.map_or(true, |ts| r.created_at < ts))
            .filter(|r| query.after.map_or(true, |ts| r.created_at > ts))
            .collect();
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn delete_feed_entries_for_post(&self, post_id: Uuid) -> Result<Vec<Uuid>> {
        let mut rows = self.rows.lock();
        let viewers = rows
            .iter()
            .filter(|r| r.post_id == post_id)
            .map(|r| r.viewer_id)
            .collect();
        rows.retain(|r| r.post_id != post_id);
        Ok(viewers)
    }
}

/// Follower lists with failure injection
#[derive(Default)]
pub struct MemorySocialGraph {
    followers: Mutex<HashMap<Uuid, Vec<Uuid>>>,
    pub calls: AtomicUsize,
    fail_next: AtomicUsize,
    always_fail: AtomicBool,
}

impl MemorySocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow(&self, follower: Uuid, followee: Uuid) {
        self.followers
            .lock()
            .entry(followee)
            .or_default()
            .push(follower);
    }

    pub fn set_followers(&self, user_id: Uuid, followers: Vec<Uuid>) {
        self.followers.lock().insert(user_id, followers);
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocialGraph for MemorySocialGraph {
    async fn get_follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) || take_one(&self.fail_next) {
            return Err(AppError::Graph("graph unavailable".into()));
        }
        Ok(self
            .followers
            .lock()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryPostStore {
    posts: Mutex<Vec<PostRef>>,
    counts: Mutex<HashMap<Uuid, PostCounts>>,
    pub count_loads: AtomicUsize,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_post(&self, post: PostRef) {
        self.counts.lock().entry(post.id).or_default();
        self.posts.lock().push(post);
    }

    pub fn set_counts(&self, post_id: Uuid, counts: PostCounts) {
        self.counts.lock().insert(post_id, counts);
    }

    pub fn count_loads(&self) -> usize {
        self.count_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn query_user_posts(&self, author_id: Uuid, query: FeedQuery) -> Result<Vec<PostRef>> {
        let mut rows: Vec<PostRef> = self
            .posts
            .lock()
            .iter()
            .filter(|p| p.author_id == author_id)
            .filter(|p| query.before.map_or(true, |ts| p.created_at < ts))
            .filter(|p| query.after.map_or(true, |ts| p.created_at > ts))
            .cloned()
            .collect();
        newest_first(&mut rows, |p| (p.created_at, p.id));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn load_post_counts(&self, post_id: Uuid) -> Result<Option<PostCounts>> {
        self.count_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.counts.lock().get(&post_id).copied())
    }
}

/// Records dispatched jobs so tests can run them by hand
#[derive(Default)]
pub struct CollectingDispatcher {
    jobs: Mutex<Vec<FanoutJob>>,
}

impl CollectingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<FanoutJob> {
        std::mem::take(&mut *self.jobs.lock())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}

#[async_trait]
impl FanoutDispatcher for CollectingDispatcher {
    async fn dispatch(&self, job: FanoutJob) -> Result<()> {
        self.jobs.lock().push(job);
        Ok(())
    }
}

/// Everything wired over in-memory collaborators
pub struct Harness {
    pub store: Arc<MemoryFeedStore>,
    pub graph: Arc<MemorySocialGraph>,
    pub posts: Arc<MemoryPostStore>,
    pub cache: Arc<MemoryCacheBackend>,
    pub feeds: NewsFeedService,
    pub timeline: TimelineService,
    pub engine: FanoutEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(LIST_LIMIT, PAGE_SIZE, 1000)
    }

    pub fn with_limits(list_limit: usize, page_size: usize, batch_size: usize) -> Self {
        let store = Arc::new(MemoryFeedStore::new());
        let graph = Arc::new(MemorySocialGraph::new());
        let posts = Arc::new(MemoryPostStore::new());
        let cache = Arc::new(MemoryCacheBackend::new());

        let feeds = NewsFeedService::new(
            store.clone(),
            BoundedListCache::new(cache.clone(), list_limit, 3600),
            page_size,
        );
        let timeline = TimelineService::new(
            posts.clone(),
            BoundedListCache::new(cache.clone(), list_limit, 3600),
            page_size,
        );
        let engine = FanoutEngine::new(store.clone(), graph.clone(), feeds.clone(), batch_size);

        Self {
            store,
            graph,
            posts,
            cache,
            feeds,
            timeline,
            engine,
        }
    }

    /// Run dispatched jobs, and the jobs they dispatch, until none are left.
    pub async fn drain(&self, dispatcher: &CollectingDispatcher) {
        loop {
            let jobs = dispatcher.take();
            if jobs.is_empty() {
                break;
            }
            for job in jobs {
                self.engine.run_job(&job, dispatcher).await.unwrap();
            }
        }
    }

    /// Store `n` feed entries for `viewer`, one second apart; returns them
    /// newest first.
    pub async fn seed_feed(&self, viewer: Uuid, n: usize) -> Vec<FeedEntry> {
        let entries: Vec<NewFeedEntry> = (0..n)
            .map(|i| NewFeedEntry {
                viewer_id: viewer,
                post_id: Uuid::new_v4(),
                created_at: base_time() + Duration::seconds(i as i64),
            })
            .collect();
        self.store.bulk_create_feed_entries(&entries).await.unwrap();
        self.store.feed_of(viewer)
    }
}

pub fn post_by(author_id: Uuid) -> PostRef {
    PostRef {
        id: Uuid::new_v4(),
        author_id,
        created_at: Utc::now(),
    }
}
