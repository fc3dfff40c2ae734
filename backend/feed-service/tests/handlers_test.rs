mod common;

use actix_web::{http::StatusCode, test, web, App};
use common::{post_by, CollectingDispatcher, Harness};
use feed_service::handlers::{self, FeedHandlerState, USER_ID_HEADER};
use feed_service::models::{truncate_to_micros, PostCounts, PostRef};
use feed_service::pagination::encode_cursor;
use feed_service::services::PostCounterService;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

fn state(h: &Harness, dispatcher: Arc<CollectingDispatcher>) -> web::Data<FeedHandlerState> {
    web::Data::new(FeedHandlerState {
        feeds: h.feeds.clone(),
        timeline: h.timeline.clone(),
        engine: h.engine.clone(),
        counters: PostCounterService::new(h.posts.clone(), h.cache.clone()),
        dispatcher,
    })
}

#[actix_web::test]
async fn test_newsfeed_requires_viewer_header() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(state(&h, Arc::new(CollectingDispatcher::new())))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/newsfeeds").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/api/v1/newsfeeds")
        .insert_header((USER_ID_HEADER, "not-a-uuid"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_conflicting_cursors_rejected() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(state(&h, Arc::new(CollectingDispatcher::new())))
            .configure(handlers::configure),
    )
    .await;

    let token = encode_cursor(common::base_time());
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/newsfeeds?before={}&after={}", token, token))
        .insert_header((USER_ID_HEADER, Uuid::new_v4().to_string()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/api/v1/newsfeeds?before=%21%21")
        .insert_header((USER_ID_HEADER, Uuid::new_v4().to_string()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_created_post_appears_in_author_feed() {
    let h = Harness::new();
    let dispatcher = Arc::new(CollectingDispatcher::new());
    let app = test::init_service(
        App::new()
            .app_data(state(&h, dispatcher.clone()))
            .configure(handlers::configure),
    )
    .await;

    let author = Uuid::new_v4();
    let post = post_by(author);
    let req = test::TestRequest::post()
        .uri("/api/v1/internal/posts")
        .set_json(&post)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(dispatcher.len(), 1);

    let req = test::TestRequest::get()
        .uri("/api/v1/newsfeeds")
        .insert_header((USER_ID_HEADER, author.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["post_id"], post.id.to_string());
    assert_eq!(body["has_next_page"], false);
    assert!(body["next_cursor"].is_null());
    assert!(body["refresh_cursor"].is_string());
}

#[actix_web::test]
async fn test_repeated_post_listed_once_in_timeline() {
    let h = Harness::new();
    let dispatcher = Arc::new(CollectingDispatcher::new());
    let app = test::init_service(
        App::new()
            .app_data(state(&h, dispatcher.clone()))
            .configure(handlers::configure),
    )
    .await;

    let author = Uuid::new_v4();
    let older = PostRef {
        created_at: common::base_time(),
        ..post_by(author)
    };
    h.posts.add_post(older.clone());
    let timeline_uri = format!("/api/v1/users/{}/posts", author);
    let req = test::TestRequest::get().uri(&timeline_uri).to_request();
    let warm: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(warm["results"].as_array().unwrap().len(), 1);

    let post = post_by(author);
    h.posts.add_post(PostRef {
        created_at: truncate_to_micros(post.created_at),
        ..post.clone()
    });
    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/api/v1/internal/posts")
            .set_json(&post)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    let req = test::TestRequest::get().uri(&timeline_uri).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let ids: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![post.id.to_string(), older.id.to_string()]);
    assert_eq!(h.store.count(author, post.id), 1);
}

#[actix_web::test]
async fn test_feed_pages_link_with_next_cursor() {
    let h = Harness::with_limits(1000, 2, 1000);
    let viewer = Uuid::new_v4();
    let expected = h.seed_feed(viewer, 3).await;
    let app = test::init_service(
        App::new()
            .app_data(state(&h, Arc::new(CollectingDispatcher::new())))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/newsfeeds")
        .insert_header((USER_ID_HEADER, viewer.to_string()))
        .to_request();
    let first: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(first["results"].as_array().unwrap().len(), 2);
    assert_eq!(first["has_next_page"], true);
    let next = first["next_cursor"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/newsfeeds?before={}", next))
        .insert_header((USER_ID_HEADER, viewer.to_string()))
        .to_request();
    let second: Value = test::call_and_read_body_json(&app, req).await;
    let results = second["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["post_id"], expected[2].post_id.to_string());
    assert_eq!(second["has_next_page"], false);
}

#[actix_web::test]
async fn test_delete_post_removes_entries() {
    let h = Harness::new();
    let dispatcher = Arc::new(CollectingDispatcher::new());
    let author = Uuid::new_v4();
    let post = post_by(author);
    h.engine
        .on_post_created(&post, dispatcher.as_ref())
        .await
        .unwrap();

    let app = test::init_service(
        App::new()
            .app_data(state(&h, dispatcher.clone()))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/internal/posts/{}?author_id={}", post.id, author))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["removed"], 1);
    assert_eq!(h.store.count(author, post.id), 0);
}

#[actix_web::test]
async fn test_counter_routes() {
    let h = Harness::new();
    let post = post_by(Uuid::new_v4());
    h.posts.add_post(post.clone());
    h.posts.set_counts(
        post.id,
        PostCounts {
            likes_count: 2,
            comments_count: 5,
        },
    );
    let app = test::init_service(
        App::new()
            .app_data(state(&h, Arc::new(CollectingDispatcher::new())))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{}/counts", post.id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["likes_count"], 2);
    assert_eq!(body["comments_count"], 5);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/internal/posts/{}/counters/likes/incr", post.id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["counter"], "likes_count");
    assert_eq!(body["value"], 3);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/internal/posts/{}/counters/shares/incr", post.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_client_error());
}
