//! CAN bus monitor: subscribes to a set of arbitration ids and prints every
//! frame as it arrives. Handy for watching motor feedback live.

use clap::{App, Arg};
use tracing::info;

use robocore::context::Context;
use robocore::io::can::CanBusInfo;
use robocore::io::Payload;
use robocore::sched::{wait_for, Scheduler};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("busmon")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Watch frames on a CAN bus")
        .arg(
            Arg::with_name("interface")
                .short("i")
                .long("interface")
                .value_name("IFACE")
                .help("CAN network interface to open")
                .takes_value(true)
                .default_value("can0"),
        )
        .arg(
            Arg::with_name("ids")
                .short("d")
                .long("id")
                .value_name("ID")
                .help("Arbitration id to watch (hex, e.g. 0x201); repeatable")
                .takes_value(true)
                .multiple(true)
                .required(true),
        )
        .arg(
            Arg::with_name("duration")
                .short("t")
                .long("duration")
                .value_name("SECONDS")
                .help("Stop after this many seconds (default: run until killed)")
                .takes_value(true),
        )
        .get_matches();

    let interface = matches.value_of("interface").unwrap_or("can0").to_string();
    let mut ids = Vec::new();
    for raw in matches.values_of("ids").into_iter().flatten() {
        let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
        let id = u32::from_str_radix(trimmed, 16)
            .map_err(|_| format!("bad arbitration id {raw:?}"))?;
        ids.push(id);
    }
    let duration: Option<u64> = match matches.value_of("duration") {
        Some(raw) => Some(raw.parse().map_err(|_| format!("bad duration {raw:?}"))?),
        None => None,
    };

    let ctx = Context::new();
    let sched = Scheduler::new()?;

    let bus = ctx.init(CanBusInfo::interface("monitor", interface.clone()))?;
    info!(interface = %interface, ids = ?ids, "monitoring");

    for id in ids {
        bus.on_frame(id, move |payload: Payload| async move {
            let bytes: Vec<String> = payload.iter().map(|b| format!("{b:02X}")).collect();
            println!("{id:#05x}  [{}]  {}", payload.len(), bytes.join(" "));
        });
    }

    if let Some(secs) = duration {
        let stopper = ctx.clone();
        ctx.spawn(async move {
            wait_for(std::time::Duration::from_secs(secs)).await;
            stopper.stop();
        });
    }

    sched.run(&ctx);
    Ok(())
}
