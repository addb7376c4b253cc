use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::utils::{parse_time_of_day, time_of_day};

pub mod constant {
    pub(crate) const TRUCK_COUNT: usize = 3;
    pub(crate) const TRUCK_CAPACITY: usize = 16;
    pub(crate) const MAX_LEGS_PER_TRUCK: usize = 2;
    pub(crate) const AVERAGE_SPEED_MPH: f64 = 18.0;
    pub(crate) const MILEAGE_BUDGET: f64 = 140.0;
    pub(crate) const INCLUDE_RETURN_TO_HUB: bool = true;
    pub(crate) const DAY_START: (u32, u32) = (8, 0);
    pub(crate) const END_OF_DAY: (u32, u32) = (17, 0);
    pub(crate) const HUB_ADDRESS: &str = "4001 South 700 East";
    pub(crate) const SEED: u64 = 64;
    pub(crate) const DELIVERY_LOG_PATH: &str = "delivery_log.csv";
    pub(crate) const SUMMARY_PATH: &str = "dispatch_summary.json";
}

/// Fleet rules and acceptance thresholds for one dispatch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchConfig {
    pub truck_count: usize,
    pub truck_capacity: usize,
    pub max_legs_per_truck: usize,
    pub average_speed_mph: f64,
    pub mileage_budget: f64,
    /// Count the final drive back to the hub in truck mileage.
    pub include_return_to_hub: bool,
    pub day_start: NaiveTime,
    pub end_of_day: NaiveTime,
    pub hub_address: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            truck_count: constant::TRUCK_COUNT,
            truck_capacity: constant::TRUCK_CAPACITY,
            max_legs_per_truck: constant::MAX_LEGS_PER_TRUCK,
            average_speed_mph: constant::AVERAGE_SPEED_MPH,
            mileage_budget: constant::MILEAGE_BUDGET,
            include_return_to_hub: constant::INCLUDE_RETURN_TO_HUB,
            day_start: time_of_day(constant::DAY_START.0, constant::DAY_START.1),
            end_of_day: time_of_day(constant::END_OF_DAY.0, constant::END_OF_DAY.1),
            hub_address: constant::HUB_ADDRESS.to_string(),
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by any `WGUPS_*` variables present in the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_from_env("WGUPS_TRUCK_COUNT", &mut config.truck_count);
        override_from_env("WGUPS_TRUCK_CAPACITY", &mut config.truck_capacity);
        override_from_env("WGUPS_MAX_LEGS", &mut config.max_legs_per_truck);
        override_from_env("WGUPS_SPEED_MPH", &mut config.average_speed_mph);
        override_from_env("WGUPS_MILEAGE_BUDGET", &mut config.mileage_budget);
        override_from_env("WGUPS_RETURN_TO_HUB", &mut config.include_return_to_hub);
        if let Ok(hub) = env::var("WGUPS_HUB_ADDRESS") {
            config.hub_address = hub;
        }
        override_time_from_env("WGUPS_DAY_START", &mut config.day_start);
        override_time_from_env("WGUPS_END_OF_DAY", &mut config.end_of_day);

        info!("Dispatch config: {:?}", config);
        config
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if self.truck_count == 0 {
            return Err(DispatchError::InvalidConfig("fleet has no trucks".into()));
        }
        if self.truck_capacity == 0 {
            return Err(DispatchError::InvalidConfig("truck capacity is zero".into()));
        }
        if self.max_legs_per_truck == 0 {
            return Err(DispatchError::InvalidConfig("trucks may not leave the hub".into()));
        }
        if !self.average_speed_mph.is_finite() || self.average_speed_mph <= 0.0 {
            return Err(DispatchError::InvalidConfig(format!(
                "average speed must be positive, got {}",
                self.average_speed_mph
            )));
        }
        if self.end_of_day <= self.day_start {
            return Err(DispatchError::InvalidConfig(
                "end of day must come after day start".into(),
            ));
        }
        Ok(())
    }
}

fn override_from_env<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring {}: cannot parse '{}'", key, raw),
        }
    }
}

fn override_time_from_env(key: &str, slot: &mut NaiveTime) {
    if let Ok(raw) = env::var(key) {
        match parse_time_of_day(&raw) {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring {}: cannot parse '{}'", key, raw),
        }
    }
}
