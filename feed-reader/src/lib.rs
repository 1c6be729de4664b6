pub mod types;
pub mod traits;
pub mod storage;
pub mod fetcher;
pub mod parser;
pub mod scheduler;
pub mod aggregator;
pub mod utils;

pub use types::*;
pub use traits::{Clock, FeedRequest, FeedResponse, HttpTransport, SystemClock};
pub use storage::LocalStorage;
pub use fetcher::{FetchOutcome, Fetcher, ReqwestTransport};
pub use parser::FeedParser;
pub use scheduler::{FeedOutcome, FetchScheduler};
pub use aggregator::{AggregateOutput, FeedAggregator};
