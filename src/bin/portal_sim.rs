//! Portal simulator - serves a scripted RPM line stream over TCP
//!
//! Stands in for a serial-to-Ethernet converter so the gateway can be run
//! locally with `source.mode = "tcp"`. Every connection gets its own copy of
//! the script: background readings, then a pass through the portal (scan,
//! optional alarm, occupancy end, speed), a tamper trip/clear now and then,
//! and the odd unknown or malformed line.
//!
//! Usage:
//!   cargo run --bin portal-sim -- --bind 127.0.0.1:4001 --interval-ms 200

use clap::Parser;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(name = "portal-sim")]
#[command(about = "Scripted radiation portal monitor for local testing")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:4001")]
    bind: String,

    /// Delay between lines
    #[arg(long, default_value = "200")]
    interval_ms: u64,

    /// Background cycles between portal passes
    #[arg(long, default_value = "5")]
    background_cycles: u32,

    /// Every Nth pass raises an alarm (0 disables alarms)
    #[arg(long, default_value = "3")]
    alarm_every: u32,

    /// Include unknown and malformed lines in the script
    #[arg(long)]
    noise: bool,

    /// Stop after this many passes (0 runs forever)
    #[arg(long, default_value = "0")]
    passes: u32,
}

/// Lines for one background cycle
fn background(cycle: u32) -> Vec<String> {
    let jitter = cycle % 7;
    vec![
        format!("GB,{},{},{},{}", 210 + jitter, 198 + jitter, 205, 201 + jitter),
        format!("NB,{},{},{},{}", 1, jitter % 2, 0, 1),
    ]
}

/// Lines for one target passing through the portal
fn pass(index: u32, args: &Args) -> Vec<String> {
    let alarm = args.alarm_every > 0 && index % args.alarm_every == 0;
    let mut lines = vec![
        "GS,250,244,260,251".to_string(),
        "NS,1,1,0,2".to_string(),
        "GS,310,298,322,305".to_string(),
    ];
    if alarm {
        if index % 2 == 0 {
            lines.push("GA,1520,1480,1610,1555".to_string());
        } else {
            lines.push("NA,14,11,17,12".to_string());
        }
        lines.push("GS,290,280,301,288".to_string());
    }
    lines.push(format!("GX,{},{}", index + 1, 1200 + index * 10));
    lines.push(format!("SP,{:.1}", 4.5 + f64::from(index % 5)));
    lines
}

fn noise(index: u32) -> Vec<String> {
    match index % 4 {
        0 => vec!["XY,1,2".to_string()],
        1 => vec!["GB,abc,1,1,1".to_string()],
        2 => vec!["SG1,100,200,300".to_string()],
        _ => vec!["GX,0,0".to_string()],
    }
}

async fn serve(mut socket: TcpStream, args: Args) -> std::io::Result<()> {
    let interval = Duration::from_millis(args.interval_ms);
    let mut cycle = 0u32;
    let mut index = 0u32;

    loop {
        let mut script = Vec::new();
        for _ in 0..args.background_cycles {
            script.extend(background(cycle));
            cycle = cycle.wrapping_add(1);
        }
        index += 1;
        script.extend(pass(index, &args));
        if index % 4 == 0 {
            script.push("TT".to_string());
            script.push("TC".to_string());
        }
        if args.noise {
            script.extend(noise(index));
        }

        for line in script {
            socket.write_all(line.as_bytes()).await?;
            socket.write_all(b"\r\n").await?;
            tokio::time::sleep(interval).await;
        }
        info!(pass = %index, "sim_pass_sent");

        if args.passes > 0 && index >= args.passes {
            socket.shutdown().await?;
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let listener = TcpListener::bind(&args.bind).await?;
    info!(bind = %args.bind, "portal_sim_listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(peer = %peer, "portal_sim_client_connected");
        let args = args.clone();
        tokio::spawn(async move {
            match serve(socket, args).await {
                Ok(()) => info!(peer = %peer, "portal_sim_script_complete"),
                Err(e) => warn!(peer = %peer, error = %e, "portal_sim_client_gone"),
            }
        });
    }
}
