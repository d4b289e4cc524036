mod echo_client;

use aiosock::supervisor::BoxError;
use aiosock::{SupervisorConfig, TaskGroup};
use clap::Parser;
use log::*;

use crate::echo_client::{read_input, ClientTarget, EchoClient, Prompt};

#[derive(Parser, Debug)]
#[command(version, about = "TCP/UDP echo client; press Enter to send again, q to quit")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    #[arg(short, long, default_value_t = 25000)]
    port: u16,

    /// Use UDP instead of TCP
    #[arg(short, long)]
    udp: bool,

    /// Number of concurrent clients
    #[arg(short, long, default_value_t = 1)]
    count: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let target = if args.udp { ClientTarget::Udp } else { ClientTarget::Tcp };

    let (prompt, lines) = Prompt::new();
    let group: TaskGroup<()> = TaskGroup::new();
    group.spawn("input", read_input(lines, prompt.quit()));

    // Clients are launched from a unit of their own; the group picks them up as they appear.
    let launcher = group.clone();
    group.spawn("launcher", async move {
        for id in 0..args.count {
            let client = EchoClient::new(target, args.server.clone(), args.port);
            launcher.spawn(format!("{:?}-client-{}", target, id), client.run(id, prompt.clone()));
        }
        Ok::<_, BoxError>(())
    });

    let report = group.wait_all(&SupervisorConfig::default()).await;
    let failed = report.failures().count();
    info!("{} units finished, {} failed", report.len(), failed);
    if failed > 0 {
        anyhow::bail!("{} of {} units failed", failed, report.len());
    }
    Ok(())
}
