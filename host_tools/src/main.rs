//! Monitor for the bridge's serial uplink.
//!
//! Prints every publish request the firmware emits. This is a debugging
//! sink; it does not forward anything to an MQTT broker.

mod device;
mod protocol;

use clap::Parser;
use colored::Colorize;

use device::{resolve_port, UplinkReader};

#[derive(Parser)]
#[command(name = "uplink-monitor")]
#[command(about = "Decode publish frames from the LoRa MQTT bridge")]
struct Args {
    /// Serial port of the bridge's uplink (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Only show state messages, not discovery config
    #[arg(long)]
    state_only: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let port = resolve_port(&args.port)?;

    println!("{}", "LoRa MQTT Bridge Uplink Monitor".bold());
    println!("Port: {}", port);
    println!("Baud: {}", args.baud);
    println!();

    let mut reader = UplinkReader::new(&port, args.baud)?;
    reader.clear_buffer()?;
    println!("{}", "Listening...".green());

    loop {
        match reader.next_frame()? {
            Ok(publish) => {
                if args.state_only && publish.topic.ends_with("/config") {
                    continue;
                }
                let flags = format!("qos={} retain={}", publish.qos, publish.retain);
                println!(
                    "{} {} {}",
                    publish.topic.cyan(),
                    flags.dimmed(),
                    String::from_utf8_lossy(&publish.payload)
                );
            }
            Err(e) => println!("{} {}", "invalid frame:".red(), e),
        }
    }
}
