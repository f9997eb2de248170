pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod json_bridge;
pub mod live;
pub mod memory;
pub mod progress;
pub mod schema;
pub mod store;

pub use backend::{Backend, Order, Query, Subscription, SubscriptionSender};
pub use config::{BackendConfig, Config, ReaderConfig, data_dir};
pub use error::{Result, StoreError};
pub use http::HttpBackend;
pub use live::{Join, LiveCollection, Snapshot, fold_award};
pub use memory::MemoryBackend;
pub use progress::{ProgressUpdate, award_achievements, update_progress};
pub use store::{ContentStore, LessonSummary};
