pub mod groups;
pub mod plan;

pub use groups::*;
pub use plan::*;
