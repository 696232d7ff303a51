//! Admissions tracker: scans a mailbox for college admissions mail and keeps
//! a persisted record of decisions and deadlines.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod store;
