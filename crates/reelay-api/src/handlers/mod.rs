pub mod admin;
pub mod health;
pub mod videos;
pub mod webhooks;
