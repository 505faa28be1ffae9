//! API routes modules.
//!
//! Organized by functionality:
//! - `content` - cached comic listings, details, chapters and search
//! - `admin` - cache inspection, invalidation and warming
//! - `health` - health, liveness and Prometheus exposition
//! - `analytics` - time series and the live metrics stream

pub mod admin;
pub mod analytics;
pub mod content;
pub mod health;
