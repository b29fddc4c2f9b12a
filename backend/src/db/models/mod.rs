//! Database models, one file per table, re-exported at `crate::db::models`.

pub mod eventsub_subscription;
pub mod scheduled_stream;
pub mod streamer;
pub mod subscription_status;
pub mod user;

pub use self::eventsub_subscription::*;
pub use self::scheduled_stream::*;
pub use self::streamer::*;
pub use self::subscription_status::*;
pub use self::user::*;
