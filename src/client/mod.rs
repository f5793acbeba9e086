//! The pieces of the web client that are more than presentation: the
//! match feed, the live event stream and the REST calls behind them.

pub mod api;
pub mod backoff;
pub mod feed;
pub mod live;

pub use api::ApiClient;
pub use backoff::Backoff;
pub use feed::{Feed, FeedCache, FeedFilter, Viewer};
