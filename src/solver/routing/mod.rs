pub mod route;
pub mod selection;

pub use route::*;
pub use selection::*;
