pub mod mileage;
pub mod status;
