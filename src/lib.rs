//! Mzansi Insights - South African news blog
//!
//! This crate ingests articles from RSS feeds, generates template-filled
//! posts for selected categories, stores everything in SQLite and serves a
//! public site with an admin panel.

pub mod auth;
pub mod autopost;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod generator;
pub mod ingest;
pub mod routes;
pub mod scheduler;
pub mod text;
