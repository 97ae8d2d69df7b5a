use std::env;
use std::time::Duration;

use inquire::Select;
use inverter_link::{DriverConfig, InverterSnapshot, driver::DEFAULT_MAX_AGE, poller};

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 9600;
const PRINT_INTERVAL_MS: u64 = 2000;
const SAMPLES: usize = 30;

fn print_snapshot(snapshot: &InverterSnapshot, fresh: bool) {
    println!(
        "PV {:>6} W | grid {:>6} W | battery {:>6} W | load {:>6} W | SOC {:>3} % | status {:?}{}",
        snapshot.pv_power_w,
        snapshot.grid_power_w,
        snapshot.battery_power_w,
        snapshot.load_power_w,
        snapshot.state_of_charge,
        snapshot.inverter_status(),
        if fresh { "" } else { " (stale)" },
    );
}

fn main() {
    env_logger::init();

    // A TOML config file, a serial port name, or interactive selection
    let config = match env::args().nth(1) {
        Some(arg) if arg.ends_with(".toml") => {
            let text = std::fs::read_to_string(&arg).expect("Failed to read config file");
            toml::from_str::<DriverConfig>(&text).expect("Invalid config file")
        }
        Some(port_name) => DriverConfig::serial(port_name, BAUD_RATE),
        None => {
            let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

            if ports.is_empty() {
                eprintln!("No serial ports found!");
                std::process::exit(1);
            }

            let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

            let port_name = Select::new("Select a serial port:", port_names)
                .prompt()
                .expect("Failed to select port");
            DriverConfig::serial(port_name, BAUD_RATE)
        }
    };

    println!("Using {} transport", config.transport_kind());

    let handle = match poller::start(&config, None) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Could not start acquisition: {err}");
            std::process::exit(1);
        }
    };
    println!(
        "Polling {} at unit {}",
        handle.driver().profile_name(),
        handle.driver().unit_id()
    );

    for _ in 0..SAMPLES {
        std::thread::sleep(Duration::from_millis(PRINT_INTERVAL_MS));

        let driver = handle.driver();
        match driver.snapshot_copy() {
            Some(snapshot) if snapshot.valid => {
                print_snapshot(&snapshot, driver.is_fresh(DEFAULT_MAX_AGE))
            }
            Some(snapshot) => println!(
                "No valid data yet ({} failed cycles)",
                snapshot.consecutive_failed_cycles
            ),
            None => println!("Snapshot busy"),
        }
    }

    handle.stop();
}
