//! GitHub trending scraper with a cached JSON API and an MCP server for LLM agents.
//!
//! Scrapes the public trending page into structured records, caches them per
//! language and time window, and exposes them both as `GET /api/trending` and
//! as the `get_trending_repos` tool over an SSE-based MCP transport.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod query;
pub mod server;
pub mod session;
pub mod trending;
