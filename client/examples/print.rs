use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "print")]
struct Opt {
    /// Master server to connect to
    #[clap(default_value = "ws://localhost:27950")]
    master: String,
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
    let mut subscription = quakemaster_client::subscribe(&options.master).await?;
    let mut first = true;
    while let Some(servers) = subscription.next().await? {
        println!("{}:", if first { "servers" } else { "update" });
        first = false;
        for server in servers {
            println!("\t{}", server);
        }
    }
    println!("master closed the connection");
    Ok(())
}
