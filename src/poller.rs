//! Periodic acquisition task.
//!
//! One named thread calls [`InverterDriver::poll`] at a fixed cadence. A cycle
//! in which nothing could be read is followed by an extra cool-down, without
//! shifting the cadence: the next deadline stays where it was, so the first
//! tick after a cool-down may come early or immediately.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fugit::MillisDurationU32;
use log::{error, info, warn};

use crate::config::DriverConfig;
use crate::driver::InverterDriver;
use crate::error::InitError;
use crate::transport::DirectionControl;

/// Extra wait after a cycle in which no register was read.
pub const COOL_DOWN: MillisDurationU32 = MillisDurationU32::millis(5000);

const THREAD_NAME: &str = "inverter-poll";

/// Handle to a running poll thread.
///
/// Dropping the handle also ends the task at its next wait point.
pub struct PollerHandle {
    driver: Arc<InverterDriver>,
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl PollerHandle {
    /// The driver being polled, for snapshot readers and control writes.
    pub fn driver(&self) -> &Arc<InverterDriver> {
        &self.driver
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// End the task and wait for it. A cycle in progress is finished first.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            error!("Poll thread panicked");
        }
    }
}

/// Bring up the driver described by `config` and start polling it.
///
/// If the driver cannot be brought up no thread is started.
pub fn start(
    config: &DriverConfig,
    direction: Option<DirectionControl>,
) -> Result<PollerHandle, InitError> {
    let driver = InverterDriver::begin(config, direction).inspect_err(|err| {
        error!("Inverter init failed, acquisition not started: {err}");
    })?;
    spawn(Arc::new(driver))
}

/// Start polling an already running driver at its configured interval.
pub fn spawn(driver: Arc<InverterDriver>) -> Result<PollerHandle, InitError> {
    spawn_with_cool_down(driver, COOL_DOWN)
}

fn spawn_with_cool_down(
    driver: Arc<InverterDriver>,
    cool_down: MillisDurationU32,
) -> Result<PollerHandle, InitError> {
    let (stop, stop_rx) = mpsc::channel();
    let task_driver = driver.clone();
    let thread = thread::Builder::new()
        .name(THREAD_NAME.into())
        .spawn(move || run(&task_driver, cool_down, &stop_rx))
        .map_err(InitError::Spawn)?;
    Ok(PollerHandle {
        driver,
        stop,
        thread,
    })
}

fn run(driver: &InverterDriver, cool_down: MillisDurationU32, stop: &Receiver<()>) {
    let period = to_duration(driver.poll_interval());
    info!(
        "Inverter poll task started, {} every {} ms",
        driver.profile_name(),
        period.as_millis()
    );

    let mut next_deadline = Instant::now();
    loop {
        if !driver.poll() {
            warn!("Poll cycle failed, cooling down {} ms", cool_down.to_millis());
            if wait(stop, to_duration(cool_down)) {
                break;
            }
        }

        next_deadline += period;
        if wait(stop, next_deadline.saturating_duration_since(Instant::now())) {
            break;
        }
    }
    info!("Inverter poll task stopped");
}

/// Sleep for `timeout`, returning early with `true` if the task should stop.
fn wait(stop: &Receiver<()>, timeout: Duration) -> bool {
    match stop.recv_timeout(timeout) {
        Err(RecvTimeoutError::Timeout) => false,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
    }
}

fn to_duration(duration: MillisDurationU32) -> Duration {
    Duration::from_millis(duration.to_millis() as u64)
}
