pub mod counters;
pub mod feed;

pub use counters::{adjust_counter, get_post_counts};
pub use feed::{
    create_post, delete_post, get_newsfeeds, get_user_posts, FeedHandlerState, PageResponse,
    USER_ID_HEADER,
};

use actix_web::web;

/// Register the feed routes under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(get_newsfeeds)
            .service(get_user_posts)
            .service(get_post_counts)
            .service(
                web::scope("/internal")
                    .service(create_post)
                    .service(delete_post)
                    .service(adjust_counter),
            ),
    );
}
