//! Database module exports.

mod change_feed;
mod collection;
pub mod models;
mod mongo;
mod repository;

pub use change_feed::{ChangeEvent, invalidate_then_notify, open_change_stream, subscribe_feed};
#[allow(unused_imports)]
pub use collection::MongoCollection;
pub use mongo::Database;
pub use repository::Repositories;
