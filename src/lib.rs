//! Webbly - a themed content management server
//!
//! Pages and posts are rendered through Tera themes, comments are moderated,
//! and administrators work through a JSON API under `/api/admin`.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod plugin;
pub mod services;
pub mod theme;
