//! SDS011 polling tool
//!
//! Opens a sensor (or the built-in simulator), prints its firmware date,
//! sets the report mode and prints readings until the cycle count is reached.
//!
//! Usage:
//!   cargo run --example sds011_poll -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: first ttyUSB/ttyACM found)
//!   --baud RATE       Baud rate (default: 9600)
//!   --config FILE     Load settings from a JSON file
//!   --interval MS     Wait between readings in ms (default: 10000)
//!   --count N         Stop after N readings (default: run forever)
//!   --active          Listen to streamed reports instead of querying
//!   --simulate        Use the simulated sensor instead of a port
//!   --list            List serial ports and exit
//!
//! Set RUST_LOG=pmsense_core=debug to see frames on the wire.

use anyhow::{bail, Context};
use pmsense_core::prelude::*;
use pmsense_core::protocol::list_ports;
use tracing_subscriber::EnvFilter;

struct Args {
    port: Option<String>,
    baud: Option<u32>,
    config: Option<String>,
    interval_ms: Option<u64>,
    count: Option<u64>,
    active: bool,
    simulate: bool,
    list: bool,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        port: None,
        baud: None,
        config: None,
        interval_ms: None,
        count: None,
        active: false,
        simulate: false,
        list: false,
    };

    let mut i = 1;
    while i < argv.len() {
        let flag = argv[i].as_str();
        let mut value = || -> anyhow::Result<String> {
            i += 1;
            argv.get(i)
                .cloned()
                .with_context(|| format!("{} needs a value", flag))
        };
        match flag {
            "--port" | "-p" => args.port = Some(value()?),
            "--baud" | "-b" => args.baud = Some(value()?.parse().context("--baud")?),
            "--config" | "-c" => args.config = Some(value()?),
            "--interval" | "-i" => args.interval_ms = Some(value()?.parse().context("--interval")?),
            "--count" | "-n" => args.count = Some(value()?.parse().context("--count")?),
            "--active" => args.active = true,
            "--simulate" => args.simulate = true,
            "--list" => args.list = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => bail!("unknown option {} (try --help)", other),
        }
        i += 1;
    }
    Ok(Some(args))
}

fn print_help() {
    println!("SDS011 polling tool");
    println!();
    println!("Usage: sds011_poll [OPTIONS]");
    println!();
    println!("  --port PORT       Serial port");
    println!("  --baud RATE       Baud rate (default: 9600)");
    println!("  --config FILE     Load settings from a JSON file");
    println!("  --interval MS     Wait between readings in ms");
    println!("  --count N         Stop after N readings");
    println!("  --active          Listen to streamed reports");
    println!("  --simulate        Use the simulated sensor");
    println!("  --list            List serial ports and exit");
}

fn build_config(args: &Args) -> anyhow::Result<SensorConfig> {
    let mut config = match &args.config {
        Some(path) => SensorConfig::from_file(path)?,
        None => SensorConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port_name = port.clone();
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(interval) = args.interval_ms {
        config.poll_interval_ms = interval;
        config.active_wait_ms = interval;
    }
    if args.active {
        config.report_mode = ReportMode::Active;
    }
    if args.simulate {
        config.port_name = "simulated".to_string();
        config.warmup_ms = 0;
        config.settle_ms = 50;
    } else if config.port_name.is_empty() {
        match list_ports().into_iter().next() {
            Some(port) => config.port_name = port.name,
            None => bail!("no serial port found, use --port or --simulate"),
        }
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    if args.list {
        for port in list_ports() {
            println!(
                "{}  {}",
                port.name,
                port.product.as_deref().unwrap_or("")
            );
        }
        return Ok(());
    }

    let config = build_config(&args)?;
    let mode = config.report_mode;

    let mut conn = if args.simulate {
        Connection::with_transport(config, Box::new(SimulatedSensor::new()))
    } else {
        let mut conn = Connection::new(config);
        conn.open()?;
        conn
    };
    conn.warm_up();

    match conn.check_firmware()? {
        Some(date) => println!("firmware date: {} (dd-mm-yy)", date),
        None => println!("firmware date: no response"),
    }

    let reported = match mode {
        ReportMode::Query => conn.set_query_mode()?,
        ReportMode::Active => conn.set_active_mode()?,
    };
    println!("report mode: {:?}", reported);

    let mut poller = Poller::new(conn);
    let mut print = |sample: Sample| {
        println!(
            "{}  sds011 {}",
            sample.taken_at.format("%d %B %Y %H:%M:%S"),
            sample.reading
        );
    };
    let stats = match args.count {
        Some(n) => poller.run_for(n, &mut print)?,
        None => poller.run(&mut print)?,
    };
    println!(
        "done: {} cycles, {} readings, {} failed",
        stats.cycles, stats.decoded, stats.failed
    );
    Ok(())
}
