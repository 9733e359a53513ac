use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use quakemaster_heartbeat::Heartbeat;

#[derive(Parser, Debug)]
#[clap(name = "demo")]
struct Opt {
    /// Master server to connect to
    #[clap(default_value = "ws://localhost:27950")]
    master: String,
    /// Port game clients should connect to
    #[clap(long = "port", default_value_t = 27960)]
    port: u16,
    /// Seconds between heartbeats
    #[clap(long = "interval", default_value_t = 60)]
    interval: u64,
}

fn main() {
    let opt = Opt::parse();
    let code = {
        if let Err(e) = run(opt) {
            eprintln!("ERROR: {}", e);
            1
        } else {
            0
        }
    };
    ::std::process::exit(code);
}

#[tokio::main(flavor = "current_thread")]
async fn run(options: Opt) -> Result<()> {
    println!("connecting to {}...", options.master);
    let mut heartbeat = Heartbeat::connect(&options.master, options.port).await?;
    println!(" connected");

    let hostname = format!("demo server on port {}", options.port);
    let info = [
        ("gamename", "baseq3"),
        ("sv_hostname", hostname.as_str()),
        ("mapname", "q3dm17"),
        ("clients", "0"),
        ("sv_maxclients", "12"),
    ];
    loop {
        heartbeat.send("QuakeArena-1").await?;
        let challenge = heartbeat.respond(&info).await?;
        println!("answered challenge {:?}", challenge);
        tokio::time::sleep(Duration::from_secs(options.interval)).await;
    }
}
