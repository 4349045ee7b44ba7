use clap::Parser;
use clap::ValueEnum;
use gk_net::FetcherConfig;
use gk_net::TrustStoreMode;
use gk_net::cache::DEFAULT_CACHE_ENTRIES;
use gk_net::fetcher::DEFAULT_MAX_REDIRECTS;
use gk_net::tls::TlsPolicy;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Web page encoding conversion relay.
#[derive(Debug, Clone, Parser)]
#[command(name = "gknot-server", version, about)]
pub struct Config {
    /// Address the HTTP listener binds to.
    #[arg(long, env = "GKNOT_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// host[:port] this service is reached on, for requests without a Host header.
    #[arg(long, env = "GKNOT_PUBLIC_HOST")]
    pub public_host: Option<String>,

    /// Capacity of the in-memory response cache.
    #[arg(long, env = "GKNOT_CACHE_ENTRIES", default_value_t = DEFAULT_CACHE_ENTRIES)]
    pub cache_entries: usize,

    /// Outbound connect and read timeout.
    #[arg(long, env = "GKNOT_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    #[arg(long, env = "GKNOT_MAX_REDIRECTS", default_value_t = DEFAULT_MAX_REDIRECTS)]
    pub max_redirects: usize,

    /// Also trust the operating system's certificate store for HTTPS.
    #[arg(long, env = "GKNOT_TRUST_OS_ROOTS")]
    pub trust_os_roots: bool,

    #[arg(long, env = "GKNOT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn fetcher_config(&self) -> FetcherConfig {
        let trust_store_mode = if self.trust_os_roots {
            TrustStoreMode::WebPkiAndOs
        } else {
            TrustStoreMode::WebPkiOnly
        };

        FetcherConfig {
            max_redirects: self.max_redirects,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            cache_entries: self.cache_entries,
            tls_policy: TlsPolicy::default().with_trust_store_mode(trust_store_mode),
        }
    }

    /// Falls back to the bind address.
    pub fn service_host(&self) -> String {
        self.public_host
            .clone()
            .unwrap_or_else(|| self.bind.to_string())
    }
}
