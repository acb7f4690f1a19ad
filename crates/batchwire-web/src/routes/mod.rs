//! Route handlers.

pub mod internal;
pub mod jobs;
pub mod session;
pub mod uploads;
