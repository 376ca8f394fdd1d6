pub mod feed_service;
pub mod item_service;
pub mod models;
pub mod user_service;
