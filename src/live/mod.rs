pub mod feed;
pub mod merge;
pub mod store;

pub use feed::{LiveEvent, LiveFeeds, StreamingApi, Topic};
pub use store::{Insight, InsightStore, Quote, QuoteStore, QuoteTick};
