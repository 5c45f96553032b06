pub mod pool;

pub use pool::{work_items, Scheduler};
