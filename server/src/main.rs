use aiosock_echo_server::{lan_ip, EchoServer, Net, DEFAULT_PORT};
use clap::Parser;
use log::info;

#[derive(Parser, Debug)]
#[command(version, about = "TCP/UDP echo server")]
struct Args {
    /// Address to listen on; empty listens on all IPv4 and IPv6 interfaces
    #[arg(short = 'H', long, default_value = "")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, value_enum, default_value_t = Net::All)]
    net: Net,

    /// Close TCP connections after the first reply
    #[arg(short, long)]
    disconnect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(ip) = lan_ip() {
        info!("LAN address {}", ip);
    }
    info!("Starting {:?} echo server on port {}", args.net, args.port);

    EchoServer::new(args.host, args.port, args.net)
        .with_disconnect(args.disconnect)
        .run()
        .await?;
    Ok(())
}
