pub mod broadcast;
pub mod config;
pub mod dialog;
pub mod engagement;
pub mod handlers;
pub mod moderation;
pub mod restriction_manager;
pub mod storage;
pub mod transport;
pub mod user_directory;
