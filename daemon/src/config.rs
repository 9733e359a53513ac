use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::challenge::ChallengePolicy;

pub const DEFAULT_PORT: u16 = 27950;
pub const DEFAULT_TTL: Duration = Duration::from_secs(350);
/// Longest accepted TTL; the sweep timer is scheduled this far ahead
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Parser, Debug)]
#[clap(name = "quakemaster", version)]
pub struct Opt {
    /// JSON file whose settings take precedence over the command line
    #[clap(parse(from_os_str), long = "config")]
    pub config: Option<PathBuf>,
    /// Address to listen on
    #[clap(long = "bind", default_value = "0.0.0.0")]
    pub bind: IpAddr,
    /// Port to listen on
    #[clap(long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Seconds a server stays listed without answering a challenge
    #[clap(long = "ttl", default_value_t = DEFAULT_TTL.as_secs())]
    pub ttl: u64,
    /// Only list servers whose info response echoes their challenge
    #[clap(long = "strict-challenge")]
    pub strict_challenge: bool,
    /// Ignore X-Forwarded-For/X-Forwarded-Port from reverse proxies
    #[clap(long = "ignore-forwarded")]
    pub ignore_forwarded: bool,
    /// Log to the systemd journal instead of stderr
    #[clap(long = "journald")]
    pub journald: bool,
    /// Log to a file instead of stderr
    #[clap(parse(from_os_str), long = "log-file", conflicts_with = "journald")]
    pub log_file: Option<PathBuf>,
}

/// Settings read from `--config`
#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<IpAddr>,
    port: Option<u16>,
    ttl: Option<u64>,
    challenge: Option<ChallengePolicy>,
    trust_proxy: Option<bool>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: SocketAddr,
    /// How long a server stays listed without answering, and how often stale servers are swept
    pub ttl: Duration,
    pub challenge: ChallengePolicy,
    /// Honor proxy-supplied client addresses
    pub trust_proxy: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            ttl: DEFAULT_TTL,
            challenge: ChallengePolicy::Permissive,
            trust_proxy: true,
        }
    }
}

impl Config {
    pub fn from_options(opt: &Opt) -> Result<Self> {
        let file = match opt.config {
            Some(ref path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let cli = Self {
            listen: SocketAddr::new(opt.bind, opt.port),
            ttl: Duration::from_secs(opt.ttl),
            challenge: if opt.strict_challenge {
                ChallengePolicy::Strict
            } else {
                ChallengePolicy::Permissive
            },
            trust_proxy: !opt.ignore_forwarded,
        };
        cli.overlay(file).validated()
    }

    fn overlay(self, file: FileConfig) -> Self {
        Self {
            listen: SocketAddr::new(
                file.bind.unwrap_or_else(|| self.listen.ip()),
                file.port.unwrap_or_else(|| self.listen.port()),
            ),
            ttl: file.ttl.map_or(self.ttl, Duration::from_secs),
            challenge: file.challenge.unwrap_or(self.challenge),
            trust_proxy: file.trust_proxy.unwrap_or(self.trust_proxy),
        }
    }

    fn validated(self) -> Result<Self> {
        if self.ttl.is_zero() {
            anyhow::bail!("ttl must be at least one second");
        }
        if self.ttl > MAX_TTL {
            anyhow::bail!(
                "ttl of {}s exceeds the maximum of {}s",
                self.ttl.as_secs(),
                MAX_TTL.as_secs()
            );
        }
        Ok(self)
    }
}
