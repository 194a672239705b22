pub mod auth;
pub mod daily_reset;
pub mod health;
pub mod image;
