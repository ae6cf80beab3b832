//! Pipe Tunnel Harness
//!
//! A loopback host for the tunnel bootstrap that:
//! - Creates the read, write and log pipes a host process would
//! - Bootstraps the echo engine over them (Rust API or C entry point)
//! - Sends a message, then prints the echo and the session log

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use pipe_tunnel::{
    config::{generate_example_config, Config, CONFIG_ENV},
    engine::runtime,
    fd, ffi, open_tunnel, EchoEngine, EngineContext, HostDescriptors,
};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use tracing::{debug, info};

/// Pipe Tunnel Harness - loopback host for tunnel bootstrap
#[derive(Parser, Debug)]
#[command(name = "pipe-tunnel-harness")]
#[command(about = "Loopback host that bootstraps an echo tunnel over local pipes")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Print an example configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Message to send through the tunnel
    #[arg(short, long, default_value = "hello through the pipe")]
    message: String,

    /// Bootstrap through the C entry point instead of the Rust API
    #[arg(long)]
    ffi: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .with_writer(std::io::stderr)
        .init();

    if args.generate_config {
        let example = toml::to_string_pretty(&generate_example_config())
            .context("Failed to serialize example config")?;
        println!("{}", example);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };

    // Pipes as the host would create them: the tunnel reads `tunnel_read`,
    // writes `tunnel_write` and logs to `tunnel_log`
    let (tunnel_read, host_tx) = fd::pipe().context("Failed to create inbound pipe")?;
    let (host_rx, tunnel_write) = fd::pipe().context("Failed to create outbound pipe")?;
    let (host_log, tunnel_log) = fd::pipe().context("Failed to create log pipe")?;
    let host = HostDescriptors::new(
        tunnel_read.as_raw_fd(),
        tunnel_write.as_raw_fd(),
        tunnel_log.as_raw_fd(),
    );
    debug!(?host, "created host pipes");

    if args.ffi {
        if let Some(path) = &args.config {
            std::env::set_var(CONFIG_ENV, path);
        }
        ffi::install_engine(Arc::new(EchoEngine::default()));

        let status = ffi::OpenTunnel(host.read, host.write, host.log);
        if status != ffi::STATUS_OK {
            bail!("OpenTunnel returned {}", status);
        }
        info!("tunnel started through OpenTunnel");
    } else {
        let runtime = runtime::shared(&config.runtime).context("Failed to start runtime")?;
        let ctx = EngineContext::new(runtime.handle().clone());
        let tunnel = open_tunnel(&EchoEngine::default(), &ctx, host, &config.logging)
            .context("Tunnel bootstrap failed")?;
        info!(id = tunnel.id(), engine = tunnel.engine(), "tunnel started");
    }

    // The session only holds duplicates; the host's originals can go
    drop((tunnel_read, tunnel_write, tunnel_log));

    let message = args.message.clone().into_bytes();
    let mut host_tx = File::from(host_tx);
    let writer = std::thread::spawn(move || -> std::io::Result<()> {
        host_tx.write_all(&message)?;
        // Closing our end lets the echo session see EOF and exit
        drop(host_tx);
        Ok(())
    });

    let mut echoed = Vec::new();
    File::from(host_rx)
        .read_to_end(&mut echoed)
        .context("Failed to read echo")?;
    writer
        .join()
        .map_err(|_| anyhow!("writer thread panicked"))?
        .context("Failed to write message")?;

    let mut log = String::new();
    File::from(host_log)
        .read_to_string(&mut log)
        .context("Failed to read session log")?;

    println!("echo: {}", String::from_utf8_lossy(&echoed));
    for line in log.lines() {
        println!("log | {}", line);
    }

    if echoed != args.message.as_bytes() {
        bail!(
            "echo mismatch: sent {} bytes, received {}",
            args.message.len(),
            echoed.len()
        );
    }

    Ok(())
}
