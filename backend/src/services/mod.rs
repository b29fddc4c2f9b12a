pub mod init;
pub mod media;
pub mod schedule;
pub mod streamers;
pub mod subscriptions;
pub mod twitch;
pub mod webhooks;
