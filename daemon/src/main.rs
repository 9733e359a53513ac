use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quakemaster_daemon::{
    config::{Config, Opt},
    serve,
};

fn main() {
    let opt = Opt::parse();
    let code = {
        match init_logging(&opt) {
            Err(e) => {
                eprintln!("ERROR: {:#}", e);
                1
            }
            // Flushes buffered file logs on drop
            Ok(_guard) => {
                if let Err(e) = Config::from_options(&opt).and_then(run) {
                    eprintln!("ERROR: {:#}", e);
                    1
                } else {
                    0
                }
            }
        }
    };
    ::std::process::exit(code);
}

fn init_logging(opt: &Opt) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if opt.journald {
        let journald = tracing_journald::layer().context("failed to connect to journald")?;
        registry.with(journald).init();
        return Ok(None);
    }
    if let Some(ref path) = opt.log_file {
        let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
        registry
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .init();
        return Ok(Some(guard));
    }
    registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    Ok(None)
}

fn file_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file path {} has no file name", path.display()))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok(tracing_appender::rolling::never(dir, name))
}

#[tokio::main]
async fn run(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    serve(listener, config).await
}
