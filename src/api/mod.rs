//! HTTP API.
//!
//! ## Endpoints
//!
//! - `GET /`, `GET /index` - Landing page
//! - `GET /health` - Health check
//! - `POST /exercise/generate` - Scrape candidate sentences for a list of queries
//! - `PUT /exercise/submit` - Store an exercise built from marked-up sentences
//! - `GET /exercise/:token` - Exercise as sentences, gaps and task progress
//! - `POST /check` - Grade one answer against the stored task

mod error;
mod routes;
mod types;

pub use routes::serve;
