//! Reduce-side inner join of user activity and user profiles.

pub mod assembler;
pub mod mapper;

pub use assembler::{assemble, JoinAccumulator, JoinAssembler, JoinOutcome, JoinStats, JoinedRecord};
pub use mapper::{tag_activity, tag_profile};
