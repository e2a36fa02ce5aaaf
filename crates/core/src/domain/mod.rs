pub mod call;
pub mod context;
pub mod job;
pub mod lead;
pub mod submission;
