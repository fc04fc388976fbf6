//! Queue a fault on one unit and watch it report broken.
//!
//! Usage: break_unit <serial-port> <address> [jumper-bits]
//!
//! With `jumper-bits` (e.g. 00011100) the exact jumper pattern is
//! commanded; without it the resistor is broken to a random nominal.

use std::time::Duration;

use repairbus::BusBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let address: u8 = args
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("unit address required"))?;
    let jumper = args.next().map(|s| u8::from_str_radix(&s, 2)).transpose()?;

    let bus = BusBuilder::new().serial_port(&port).build().await?;
    bus.register_unit(address).await?;

    match jumper {
        Some(value) => bus.break_jumper(address, Some(value)).await?,
        None => bus.break_resistor(address).await?,
    }

    let _poller = bus.start_polling(Duration::from_millis(200));
    for _ in 0..25 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        let snapshots = bus.snapshots().await?;
        if let Some(unit) = snapshots.iter().find(|s| s.address == address) {
            println!(
                "0x{:02X} online={} resistor={} jumpers={}",
                unit.address, unit.online, unit.resistor_status, unit.jumpers_status
            );
        }
    }
    Ok(())
}
