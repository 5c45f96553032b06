pub mod severity;
pub mod target;
pub mod verdict;
pub mod work_item;

pub use severity::*;
pub use target::*;
pub use verdict::*;
pub use work_item::*;
