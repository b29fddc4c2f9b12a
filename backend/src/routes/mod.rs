pub mod admin;
pub mod health;
pub mod home;
pub mod schedule;
pub mod streamers;
pub mod webhooks;
