use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use netstack::driver::{dummy, loopback};
use netstack::util::{payload_preview, PREVIEW_LIMIT};
use netstack::{NetDevice, NetStack, RunningStack, StackConfig, NET_PROTOCOL_TYPE_IP};

/// ICMP echo request shaped test frame.
const TEST_FRAME: &[u8] = &[
    0x45, 0x00, 0x00, 0x30, 0x00, 0x80, 0x00, 0x00, 0xff, 0x01, 0xbd, 0x4a, 0x7f, 0x00, 0x00,
    0x01, 0x7f, 0x00, 0x00, 0x01, 0x08, 0x00, 0x35, 0x64, 0x00, 0x80, 0x00, 0x01, 0x31, 0x32,
    0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x30, 0x21, 0x40, 0x23, 0x24, 0x25, 0x5e, 0x26,
    0x2a, 0x28, 0x29,
];

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceKind {
    Loopback,
    Dummy,
}

#[derive(Parser, Debug)]
#[command(name = "netstackd")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = DeviceKind::Loopback)]
    device: DeviceKind,
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
    /// Stop after this many frames instead of waiting for Ctrl-C.
    #[arg(long)]
    count: Option<u64>,
}

fn ip_input(data: &[u8], dev: &Arc<NetDevice>) {
    log::info!(
        "ip input, dev={}, len={}, data={}",
        dev.name(),
        data.len(),
        payload_preview(data, PREVIEW_LIMIT)
    );
}

/// Stops the stack off the async runtime; shutdown joins the interrupt thread.
async fn stop(mut running: RunningStack) -> anyhow::Result<RunningStack> {
    let running = tokio::task::spawn_blocking(move || {
        running.shutdown();
        running
    })
    .await
    .context("stack shutdown task")?;
    Ok(running)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => StackConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => StackConfig::default(),
    };

    let mut stack = NetStack::new(config).context("stack init")?;
    let ip = stack.register_protocol(NET_PROTOCOL_TYPE_IP, ip_input)?;
    let dev = match args.device {
        DeviceKind::Loopback => loopback::init(&mut stack),
        DeviceKind::Dummy => dummy::init(&mut stack),
    }
    .context("device init")?;
    let running = stack.run().context("stack start")?;
    log::info!("running, dev={}, interval_ms={}", dev.name(), args.interval_ms);

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted");
                break;
            },
            _ = ticker.tick() => {
                if args.count.is_some_and(|count| sent >= count) {
                    break;
                }
                match running.output(&dev, NET_PROTOCOL_TYPE_IP, TEST_FRAME, None) {
                    Ok(()) => sent += 1,
                    Err(err) => log::warn!("output failed, dev={}: {}", dev.name(), err),
                }
                ip.drain_with_handler();
            }
        }
    }

    let running = stop(running).await?;
    debug_assert!(!running.is_running());
    let drained = ip.drain_with_handler();
    log::info!("stopped, sent={}, drained_after_stop={}", sent, drained);
    Ok(())
}
