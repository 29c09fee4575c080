//! Biblis Library Circulation System
//!
//! The loan-allocation and due-notification core of a library system:
//! granting exclusive custody of physical copies under concurrent requests,
//! enforcing per-member quotas, and a resumable batch that notifies members
//! of loans coming due. Presentation, authentication and catalog search live
//! in front of this crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
