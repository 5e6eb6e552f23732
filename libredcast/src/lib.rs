//! Redcast - scheduled posting and cross-posting for Reddit
//!
//! This library provides the delivery core of Redcast: deciding whether a
//! post goes out now or later, submitting it to Reddit with a single
//! refresh-and-retry on expired credentials, fanning one post out to many
//! subreddits, and charging the per-user post quota only for what was
//! actually delivered.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod ledger;
pub mod logging;
pub mod platforms;
pub mod poster;
pub mod scheduling;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, PostFilter};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::{PlatformError, RedcastError, Result};
pub use fanout::{
    FailureCategory, FanOut, FanOutReport, FanOutRequest, Outcome, PlannedDestination,
};
pub use ledger::{Ledger, Reservation};
pub use poster::{Delivery, Poster};
pub use types::{CredentialPair, Destination, PostContent, PostKind, PostStatus, ScheduledPost};
