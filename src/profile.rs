//! This module is used to define the register tables of the supported inverters.
//!
//! Each inverter model gets a static [`InverterProfile`]. Adding a model means
//! adding a new table here and listing it in [`PROFILES`].

use strum_macros::{EnumIter, IntoStaticStr};

/// Which snapshot field a register value is written to.
#[derive(Debug, EnumIter, IntoStaticStr, PartialEq, Eq, Clone, Copy)]
pub enum RegisterTarget {
    /// Grid power in W. Positive = import.
    GridPower,
    /// PV power in W.
    PvPower,
    /// Battery power in W. Positive = discharge.
    BatteryPower,
    /// Total house load in W.
    LoadPower,
    /// Battery state of charge in %.
    StateOfCharge,
    /// Battery state of health in %.
    StateOfHealth,
    /// Inverter status code.
    Status,
    /// Operation flag bitfield.
    OperationFlags,
    /// PV energy produced today in Wh.
    PvEnergyToday,
    /// Energy bought from the grid today in Wh.
    GridEnergyToday,
    /// Energy sold to the grid today in Wh.
    SoldEnergyToday,
    /// Read, then discarded.
    Ignore,
}

/// One mapped register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDef {
    /// Protocol register number.
    pub address: u16,
    /// `1` for a 16 bit value, `2` for a 32 bit big-endian register pair.
    pub count: u8,
    pub signed: bool,
    /// Divisor. `0` disables scaling.
    pub gain: i32,
    pub multiply: i32,
    pub target: RegisterTarget,
}

impl RegisterDef {
    pub const fn u16(address: u16, gain: i32, multiply: i32, target: RegisterTarget) -> Self {
        Self::new(address, 1, false, gain, multiply, target)
    }

    pub const fn i16(address: u16, gain: i32, multiply: i32, target: RegisterTarget) -> Self {
        Self::new(address, 1, true, gain, multiply, target)
    }

    pub const fn u32(address: u16, gain: i32, multiply: i32, target: RegisterTarget) -> Self {
        Self::new(address, 2, false, gain, multiply, target)
    }

    pub const fn i32(address: u16, gain: i32, multiply: i32, target: RegisterTarget) -> Self {
        Self::new(address, 2, true, gain, multiply, target)
    }

    const fn new(
        address: u16,
        count: u8,
        signed: bool,
        gain: i32,
        multiply: i32,
        target: RegisterTarget,
    ) -> Self {
        Self {
            address,
            count,
            signed,
            gain,
            multiply,
            target,
        }
    }
}

/// A named, fixed register table for one inverter model.
#[derive(Debug)]
pub struct InverterProfile {
    pub name: &'static str,
    pub registers: &'static [RegisterDef],
}

/// Solinteg hybrid inverters, Modbus register table V00.17.
static SOLINTEG_REGISTERS: [RegisterDef; 10] = {
    use RegisterTarget as T;
    [
        // Smart meter: + import, - export.
        RegisterDef::i32(11000, 1000, 1, T::GridPower),
        RegisterDef::u32(11028, 1000, 1, T::PvPower),
        // + discharge, - charge.
        RegisterDef::i32(30258, 1000, 1, T::BatteryPower),
        RegisterDef::i32(31306, 1000, 1, T::LoadPower),
        RegisterDef::u16(33000, 100, 1, T::StateOfCharge),
        RegisterDef::u16(33001, 100, 1, T::StateOfHealth),
        RegisterDef::u16(10105, 1, 1, T::Status),
        // Daily energy counters.
        RegisterDef::u16(31005, 10, 100, T::PvEnergyToday),
        RegisterDef::u16(31001, 10, 100, T::GridEnergyToday),
        RegisterDef::u16(31000, 10, 100, T::SoldEnergyToday),
    ]
};

// TODO: fill in once the Sermatec register documentation is available.
static SERMATEC_REGISTERS: [RegisterDef; 0] = [];

/// All known profiles. The index is the one stored in the device configuration.
pub static PROFILES: [InverterProfile; 2] = [
    InverterProfile {
        name: "Solinteg",
        registers: &SOLINTEG_REGISTERS,
    },
    InverterProfile {
        name: "Sermatec",
        registers: &SERMATEC_REGISTERS,
    },
];

/// Look up a profile by its configuration index.
pub fn profile(index: usize) -> Option<&'static InverterProfile> {
    PROFILES.get(index)
}
