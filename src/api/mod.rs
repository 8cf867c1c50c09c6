//! HTTP handlers
//!
//! Hook endpoints for each provider plus a health check.

pub mod health;
pub mod webhook;

pub use health::root;
pub use webhook::{coding_hook, gitee_hook, github_hook};
