//! Poll a bus of units and print their status.
//!
//! Usage: monitor_units <serial-port> [max-address]
//!
//! Example: monitor_units /dev/ttyUSB0 12

use std::time::Duration;

use repairbus::BusBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let max_address: u8 = args.next().and_then(|s| s.parse().ok()).unwrap_or(12);

    let bus = BusBuilder::new()
        .serial_port(&port)
        .auto_restore(true)
        .build()
        .await?;

    bus.register_units(1..=max_address).await?;
    let _poller = bus.start_polling(Duration::from_millis(200));

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        println!("--- consumption: {:.0} ohm ---", bus.total_consumption().await?);
        for unit in bus.snapshots().await? {
            println!(
                "0x{:02X} {:<7} resistor={:<7} jumpers={:<7} {:<16} seen {}",
                unit.address,
                if unit.online { "online" } else { "offline" },
                unit.resistor_status,
                unit.jumpers_status,
                unit.resistor_value,
                unit.last_updated,
            );
        }
    }
}
