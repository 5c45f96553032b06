pub mod store;

pub use store::{validate_resume_id, ProgressRecord, ProgressStore};
