//! Data Models
//!
//! Contains the data structures that flow between the analysis stages.

pub mod hypothesis;
pub mod insight;
pub mod record;
pub mod report;
pub mod summary;

pub use hypothesis::*;
pub use insight::*;
pub use record::*;
pub use report::*;
pub use summary::*;
