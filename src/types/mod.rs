//! Type definitions

pub mod job;
pub mod messages;
pub mod report;
pub mod valuation;

pub use job::*;
pub use messages::*;
pub use report::*;
pub use valuation::*;
