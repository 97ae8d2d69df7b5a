//! The acquisition driver: one inverter, one transport, one shared snapshot.
//!
//! The poll cycle is the only writer of the snapshot. Readers copy it through
//! [`InverterDriver::snapshot_copy`] and never hold the lock for longer than
//! the copy.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use fugit::MillisDurationU32;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
    clock::{Clock, SystemClock},
    config::{DriverConfig, TransportConfig},
    error::{InitError, ModbusError},
    frame::Registers,
    port::SerialPortIo,
    profile::{self, InverterProfile, RegisterDef},
    rtu::RtuTransport,
    scaling,
    tcp::{self, TcpTransport},
    transport::{DirectionControl, Transport},
    types::InverterSnapshot,
};

/// Fully failed cycles in a row after which the snapshot is no longer trusted.
pub const MAX_FAILED_CYCLES: u16 = 5;

/// Control register selecting the inverter work mode. See [`WorkMode`](crate::types::WorkMode).
pub const WORK_MODE_REGISTER: u16 = 50000;

/// Maximum age used by readers that have no opinion of their own.
pub const DEFAULT_MAX_AGE: MillisDurationU32 = MillisDurationU32::millis(10_000);

const SNAPSHOT_LOCK_WAIT: Duration = Duration::from_millis(100);
const FRESHNESS_LOCK_WAIT: Duration = Duration::from_millis(50);
/// Worst case for one network call with default timeouts: connect and wait
/// for the answer, then reconnect and wait again. One second of slack on top.
const TRANSPORT_LOCK_WAIT: Duration = Duration::from_millis(
    2 * (tcp::CONNECT_TIMEOUT.ticks() as u64 + tcp::RESPONSE_TIMEOUT.ticks() as u64) + 1000,
);

/// Register failures logged per cycle, the rest are only counted.
const LOGGED_FAILURES_PER_CYCLE: u16 = 3;

/// Polls one inverter according to its profile and keeps the latest values in
/// a shared [`InverterSnapshot`].
///
/// All methods take `&self`, share it between the poll task and any number of
/// readers with an [`Arc`]. Every transport access, polled reads and control
/// writes alike, goes through one lock so they never interleave on the wire.
pub struct InverterDriver {
    profile: &'static InverterProfile,
    unit_id: u8,
    poll_interval: MillisDurationU32,
    transport: Mutex<Box<dyn Transport>>,
    snapshot: RwLock<InverterSnapshot>,
    clock: Arc<dyn Clock>,
}

impl InverterDriver {
    /// Build the transport described by `config` and bring it up.
    ///
    /// `direction` drives the RS485 transceiver and is only used for serial lines.
    /// Failure here is final for this driver instance.
    pub fn begin(
        config: &DriverConfig,
        direction: Option<DirectionControl>,
    ) -> Result<Self, InitError> {
        let profile = profile::profile(config.profile_index)
            .ok_or(InitError::UnknownProfile(config.profile_index))?;
        info!(
            "Profile: {}  transport: {}",
            profile.name,
            config.transport_kind()
        );

        let transport: Box<dyn Transport> = match &config.transport {
            TransportConfig::Serial { port, baud_rate } => {
                let interface =
                    SerialPortIo::open(port, *baud_rate).map_err(|source| InitError::SerialPort {
                        port: port.clone(),
                        source,
                    })?;
                Box::new(RtuTransport::new(interface, direction))
            }
            TransportConfig::Network { host, port } => {
                let address = (host.as_str(), *port)
                    .to_socket_addrs()
                    .ok()
                    .and_then(|mut addresses| addresses.next())
                    .ok_or_else(|| InitError::Address(format!("{host}:{port}")))?;
                Box::new(TcpTransport::new(address))
            }
        };

        Self::connect_with(
            profile,
            config.effective_unit_id(),
            MillisDurationU32::millis(config.poll_interval_ms),
            transport,
            Arc::new(SystemClock::new()),
        )
    }

    /// Bring up an already constructed transport and wrap it in a driver.
    pub fn connect_with(
        profile: &'static InverterProfile,
        unit_id: u8,
        poll_interval: MillisDurationU32,
        mut transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InitError> {
        match transport.connect() {
            Ok(()) => info!("Transport OK"),
            Err(err) => {
                warn!("Transport failed: {err}");
                return Err(InitError::Connect(err));
            }
        }
        Ok(Self {
            profile,
            unit_id,
            poll_interval,
            transport: Mutex::new(transport),
            snapshot: RwLock::new(InverterSnapshot::default()),
            clock,
        })
    }

    pub fn profile_name(&self) -> &'static str {
        self.profile.name
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn poll_interval(&self) -> MillisDurationU32 {
        self.poll_interval
    }

    /// Run one acquisition cycle over every register of the profile.
    ///
    /// A failing register is counted and skipped; it never aborts the cycle.
    /// Each successful register is written to the snapshot straight away, so
    /// readers may see a mix of this cycle's and the previous cycle's values
    /// while a poll is running. Returns whether any register was read.
    pub fn poll(&self) -> bool {
        let registers = self.profile.registers;
        if registers.is_empty() {
            return false;
        }

        let mut any_ok = false;
        let mut failures: u16 = 0;

        for reg in registers {
            match self.read_register(reg) {
                Ok(raw) => {
                    any_ok = true;
                    self.apply_register(reg, &raw);
                }
                Err(err) => {
                    failures += 1;
                    if failures <= LOGGED_FAILURES_PER_CYCLE {
                        warn!("Register {} failed: {err}", reg.address);
                    }
                }
            }
        }

        self.finish_cycle(any_ok, failures);
        any_ok
    }

    fn read_register(&self, reg: &RegisterDef) -> Result<Registers, ModbusError> {
        let mut transport = self
            .transport
            .try_lock_for(TRANSPORT_LOCK_WAIT)
            .ok_or(ModbusError::Timeout)?;
        transport.read_holding_registers(self.unit_id, reg.address, reg.count)
    }

    fn apply_register(&self, reg: &RegisterDef, raw: &[u16]) {
        let scaled = scaling::scaled_value(reg, raw);
        match self.snapshot.try_write_for(SNAPSHOT_LOCK_WAIT) {
            Some(mut snapshot) => snapshot.apply(reg.target, scaled),
            None => debug!("Snapshot busy, register {} not stored", reg.address),
        }
    }

    fn finish_cycle(&self, any_ok: bool, failures: u16) {
        let Some(mut snapshot) = self.snapshot.try_write_for(SNAPSHOT_LOCK_WAIT) else {
            debug!("Snapshot busy, cycle metadata not stored");
            return;
        };

        if any_ok {
            if !snapshot.valid {
                info!("Inverter data valid");
            }
            snapshot.valid = true;
            snapshot.last_update = Some(self.clock.now());
            snapshot.last_cycle_partial_failures = failures;
            snapshot.consecutive_failed_cycles = 0;
        } else {
            snapshot.consecutive_failed_cycles = snapshot.consecutive_failed_cycles.saturating_add(1);
            if snapshot.consecutive_failed_cycles >= MAX_FAILED_CYCLES && snapshot.valid {
                warn!(
                    "No register readable for {} cycles, inverter data invalid",
                    snapshot.consecutive_failed_cycles
                );
                snapshot.valid = false;
            }
        }
    }

    /// A copy of the current snapshot, or `None` if it could not be locked in time.
    ///
    /// Check [`InverterSnapshot::valid`] before trusting the values.
    pub fn snapshot_copy(&self) -> Option<InverterSnapshot> {
        self.snapshot
            .try_read_for(SNAPSHOT_LOCK_WAIT)
            .map(|snapshot| *snapshot)
    }

    /// Whether the snapshot is valid and was refreshed less than `max_age` ago.
    pub fn is_fresh(&self, max_age: MillisDurationU32) -> bool {
        let Some(snapshot) = self.snapshot.try_read_for(FRESHNESS_LOCK_WAIT) else {
            return false;
        };
        match snapshot.last_update {
            Some(last_update) if snapshot.valid => {
                let age = self.clock.now().ticks().saturating_sub(last_update.ticks());
                age < max_age.to_millis() as u64
            }
            _ => false,
        }
    }

    /// Write one control register.
    ///
    /// Waits for any poll exchange in progress, it never shares the wire with one.
    pub fn write_register(&self, address: u16, value: u16) -> Result<(), ModbusError> {
        let mut transport = self
            .transport
            .try_lock_for(TRANSPORT_LOCK_WAIT)
            .ok_or(ModbusError::Timeout)?;
        transport.write_single_register(self.unit_id, address, value)
    }

    /// Select the inverter work mode.
    pub fn set_work_mode(&self, mode: impl Into<u16>) -> Result<(), ModbusError> {
        self.write_register(WORK_MODE_REGISTER, mode.into())
    }
}
