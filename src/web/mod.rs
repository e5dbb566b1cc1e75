//! Server-rendered pages and operational endpoints

mod pages;
pub mod views;

pub use pages::{dashboard, health_check, landing, metrics, not_found, status};
