//! This module contains the inverter snapshot and the value types decoded into it.

use fugit::TimerInstantU64;
use strum_macros::{EnumIter, IntoStaticStr};

use crate::profile::RegisterTarget;

/// Millisecond timestamp from the driver's [`Clock`](crate::clock::Clock).
pub type Timestamp = TimerInstantU64<1000>;

/// The latest decoded inverter values plus freshness metadata.
///
/// Only the driver's poll cycle writes it. Readers get copies through
/// [`InverterDriver::snapshot_copy`](crate::driver::InverterDriver::snapshot_copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InverterSnapshot {
    /// W, positive = import from the grid.
    pub grid_power_w: i32,
    pub pv_power_w: i32,
    /// W, positive = discharge.
    pub battery_power_w: i32,
    pub load_power_w: i32,
    /// 0-100 %.
    pub state_of_charge: u16,
    /// 0-100 %.
    pub state_of_health: u16,
    pub status: u16,
    pub operation_flags: u32,
    pub pv_energy_today_wh: u32,
    pub grid_energy_today_wh: u32,
    pub sold_energy_today_wh: u32,

    /// Whether the values can be trusted.
    pub valid: bool,
    /// When the last cycle with at least one successful read finished.
    pub last_update: Option<Timestamp>,
    /// Failed registers in the last cycle that had at least one success.
    pub last_cycle_partial_failures: u16,
    /// Back-to-back cycles in which no register could be read.
    pub consecutive_failed_cycles: u16,
}

impl InverterSnapshot {
    /// Store a scaled register value into the field selected by `target`.
    ///
    /// Values are narrowed to the field width the same way the inverter's own
    /// register types would be.
    pub fn apply(&mut self, target: RegisterTarget, scaled: i64) {
        use RegisterTarget as T;
        match target {
            T::GridPower => self.grid_power_w = scaled as i32,
            T::PvPower => self.pv_power_w = scaled as i32,
            T::BatteryPower => self.battery_power_w = scaled as i32,
            T::LoadPower => self.load_power_w = scaled as i32,
            T::StateOfCharge => self.state_of_charge = scaled as u16,
            T::StateOfHealth => self.state_of_health = scaled as u16,
            T::Status => self.status = scaled as u16,
            T::OperationFlags => self.operation_flags = scaled as u32,
            T::PvEnergyToday => self.pv_energy_today_wh = scaled as u32,
            T::GridEnergyToday => self.grid_energy_today_wh = scaled as u32,
            T::SoldEnergyToday => self.sold_energy_today_wh = scaled as u32,
            T::Ignore => {}
        }
    }

    /// Interpret the raw status code.
    pub fn inverter_status(&self) -> Option<InverterStatus> {
        InverterStatus::try_from(self.status).ok()
    }
}

/// Known inverter status codes.
#[derive(Debug, EnumIter, IntoStaticStr, PartialEq, Eq, Clone, Copy)]
#[repr(u16)]
pub enum InverterStatus {
    Waiting = 0,
    OnGrid = 2,
    Fault = 3,
    OffGrid = 5,
}

impl TryFrom<u16> for InverterStatus {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Waiting),
            2 => Ok(Self::OnGrid),
            3 => Ok(Self::Fault),
            5 => Ok(Self::OffGrid),
            other => Err(other),
        }
    }
}

/// Values accepted by the work-mode control register.
#[derive(Debug, EnumIter, PartialEq, Eq, Clone, Copy)]
#[repr(u16)]
pub enum WorkMode {
    /// EMS AC control mode.
    AcControl = 0x0301,
    /// EMS battery control mode.
    BatteryControl = 0x0303,
}

impl From<WorkMode> for u16 {
    fn from(value: WorkMode) -> Self {
        value as u16
    }
}
