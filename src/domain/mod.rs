pub mod registry;
pub mod truck;
pub mod types;
