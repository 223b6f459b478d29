use std::{fs, io::ErrorKind, path::Path};

use anyhow::Result;
use clap::Parser;
use service::peers::{FloodOptions, MAX_SESSIONS_PER_PEER};

/// Default preferences file, next to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "masterd.prf";

/// Flood control settings, the `flood::` key namespace of the preferences
/// file.
#[derive(Debug, Clone)]
pub struct Flood {
    /// Ban a peer once it reaches this many tickets.
    pub max_tickets: u32,
    /// Forgive accumulated tickets every this many seconds.
    pub tickets_reset_time: u64,
    /// Ban duration in seconds.
    pub ban_time: u64,
    /// Forget a peer record this many seconds after it was last seen.
    pub forget_time: u64,
    /// Tickets charged for a malformed packet.
    pub ticks_on_bad_message: u32,
}

impl Default for Flood {
    fn default() -> Self {
        let defaults = FloodOptions::default();
        Self {
            max_tickets: defaults.max_tickets,
            tickets_reset_time: defaults.ticket_reset_period,
            ban_time: defaults.ban_duration,
            forget_time: defaults.forget_time,
            ticks_on_bad_message: defaults.bad_message_tickets,
        }
    }
}

/// Daemon preferences, read from `masterd.prf`.
///
/// The file format is one `$name value` pair per line with `#` comment
/// lines, the shape the game engine's own preference exporter emits. A
/// missing file is created with the defaults; a bad value falls back to its
/// default. Either way the daemon comes up.
#[derive(Debug, Clone)]
pub struct Config {
    /// Master server name, shown in the info response.
    pub name: String,
    /// Master server region, shown in the info response.
    pub region: String,
    /// Addresses to bind, with or without an embedded port.
    pub addresses: Vec<String>,
    /// Default UDP port for addresses that carry none.
    pub port: u16,
    /// Seconds without an info response before a server is delisted.
    pub heartbeat: u64,
    /// Log filter, 0 (off) to 5 (trace).
    pub verbosity: u32,
    /// Prefix log lines with a timestamp.
    pub timestamp: bool,
    pub flood: Flood,
    /// Require the session challenge handshake.
    pub challenge_mode: bool,
    /// Seed synthetic servers that never expire.
    pub testing_mode: bool,
    /// Live sessions per peer, hard capped at 10.
    pub max_sessions_per_peer: usize,
    /// Session expiry in seconds.
    pub session_timeout: u64,
    /// Notes accumulated while parsing, replayed once the logger is up.
    pub warnings: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "Master Server".to_string(),
            region: "Earth".to_string(),
            addresses: Vec::new(),
            port: 28002,
            heartbeat: 180,
            verbosity: 3,
            timestamp: false,
            flood: Flood::default(),
            challenge_mode: false,
            testing_mode: false,
            max_sessions_per_peer: MAX_SESSIONS_PER_PEER,
            session_timeout: 120,
            warnings: Vec::new(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// Path of the preferences file.
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    /// Load the preferences named on the command line, or the default file.
    pub fn load() -> Result<Self> {
        let path = Cli::parse()
            .config
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Read and parse `path`. A missing file is written out with the
    /// defaults so the operator has something to edit.
    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let mut config = Self::default();
                match fs::write(path, config.to_prf()) {
                    Ok(()) => config.warnings.push(format!(
                        "no preferences at {}, wrote defaults",
                        path.display()
                    )),
                    Err(err) => config.warnings.push(format!(
                        "no preferences at {} and could not write defaults: {err}",
                        path.display()
                    )),
                }
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        let defaults = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(rest) = line.strip_prefix('$') else {
                config.warnings.push(format!("ignored malformed line: {line}"));
                continue;
            };

            let (key, value) = match rest.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim().replace('"', "")),
                None => (rest, String::new()),
            };

            match key {
                _ if key.eq_ignore_ascii_case("name") => config.name = value,
                _ if key.eq_ignore_ascii_case("region") => config.region = value,
                _ if key.eq_ignore_ascii_case("address") => config.addresses.push(value),
                _ if key.eq_ignore_ascii_case("port") => {
                    set(&mut config.port, key, &value, defaults.port, &mut config.warnings)
                }
                _ if key.eq_ignore_ascii_case("heartbeat") => set(
                    &mut config.heartbeat,
                    key,
                    &value,
                    defaults.heartbeat,
                    &mut config.warnings,
                ),
                _ if key.eq_ignore_ascii_case("verbosity") => {
                    set(
                        &mut config.verbosity,
                        key,
                        &value,
                        defaults.verbosity,
                        &mut config.warnings,
                    );
                    if config.verbosity > 5 {
                        config
                            .warnings
                            .push(format!("verbosity {} clamped to 5", config.verbosity));
                        config.verbosity = 5;
                    }
                }
                _ if key.eq_ignore_ascii_case("timestamp") => {
                    config.timestamp = parse_bool(&value, key, false, &mut config.warnings)
                }
                _ if key.eq_ignore_ascii_case("flood::MaxTickets") => set(
                    &mut config.flood.max_tickets,
                    key,
                    &value,
                    defaults.flood.max_tickets,
                    &mut config.warnings,
                ),
                _ if key.eq_ignore_ascii_case("flood::TicketsResetTime") => set(
                    &mut config.flood.tickets_reset_time,
                    key,
                    &value,
                    defaults.flood.tickets_reset_time,
                    &mut config.warnings,
                ),
                _ if key.eq_ignore_ascii_case("flood::BanTime") => set(
                    &mut config.flood.ban_time,
                    key,
                    &value,
                    defaults.flood.ban_time,
                    &mut config.warnings,
                ),
                _ if key.eq_ignore_ascii_case("flood::ForgetTime") => set(
                    &mut config.flood.forget_time,
                    key,
                    &value,
                    defaults.flood.forget_time,
                    &mut config.warnings,
                ),
                _ if key.eq_ignore_ascii_case("flood::TicksOnBadMessage") => set(
                    &mut config.flood.ticks_on_bad_message,
                    key,
                    &value,
                    defaults.flood.ticks_on_bad_message,
                    &mut config.warnings,
                ),
                _ if key.eq_ignore_ascii_case("challengeMode") => {
                    config.challenge_mode = parse_bool(&value, key, false, &mut config.warnings)
                }
                _ if key.eq_ignore_ascii_case("testingMode") => {
                    config.testing_mode = parse_bool(&value, key, false, &mut config.warnings)
                }
                _ if key.eq_ignore_ascii_case("maxSessionsPerPeer") => {
                    set(
                        &mut config.max_sessions_per_peer,
                        key,
                        &value,
                        defaults.max_sessions_per_peer,
                        &mut config.warnings,
                    );
                    if config.max_sessions_per_peer > MAX_SESSIONS_PER_PEER {
                        config.warnings.push(format!(
                            "maxSessionsPerPeer {} clamped to {MAX_SESSIONS_PER_PEER}",
                            config.max_sessions_per_peer
                        ));
                        config.max_sessions_per_peer = MAX_SESSIONS_PER_PEER;
                    }
                }
                _ if key.eq_ignore_ascii_case("sessionTimeoutSeconds") => set(
                    &mut config.session_timeout,
                    key,
                    &value,
                    defaults.session_timeout,
                    &mut config.warnings,
                ),
                _ => config.warnings.push(format!("unknown preference ${key}")),
            }
        }

        config
    }

    /// Serialise back into the `$name value` format.
    pub fn to_prf(&self) -> String {
        let mut out = String::new();
        out.push_str("# Master server preferences\n\n");
        out.push_str(&format!("$name \"{}\"\n", self.name));
        out.push_str(&format!("$region \"{}\"\n", self.region));
        for address in &self.addresses {
            out.push_str(&format!("$address {address}\n"));
        }
        out.push_str(&format!("$port {}\n", self.port));
        out.push_str(&format!("$heartbeat {}\n", self.heartbeat));
        out.push_str(&format!("$verbosity {}\n", self.verbosity));
        out.push_str(&format!("$timestamp {}\n", self.timestamp as u8));
        out.push('\n');
        out.push_str(&format!("$flood::MaxTickets {}\n", self.flood.max_tickets));
        out.push_str(&format!(
            "$flood::TicketsResetTime {}\n",
            self.flood.tickets_reset_time
        ));
        out.push_str(&format!("$flood::BanTime {}\n", self.flood.ban_time));
        out.push_str(&format!("$flood::ForgetTime {}\n", self.flood.forget_time));
        out.push_str(&format!(
            "$flood::TicksOnBadMessage {}\n",
            self.flood.ticks_on_bad_message
        ));
        out.push('\n');
        out.push_str(&format!("$challengeMode {}\n", self.challenge_mode as u8));
        out.push_str(&format!("$testingMode {}\n", self.testing_mode as u8));
        out.push_str(&format!(
            "$maxSessionsPerPeer {}\n",
            self.max_sessions_per_peer
        ));
        out.push_str(&format!("$sessionTimeoutSeconds {}\n", self.session_timeout));
        out
    }

    /// The socket addresses to bind: every configured address with the
    /// default port appended where missing, or the wildcard when none are
    /// configured.
    pub fn listen_addrs(&self) -> Vec<std::net::SocketAddr> {
        use std::net::{IpAddr, SocketAddr};

        if self.addresses.is_empty() {
            return vec![SocketAddr::from(([0, 0, 0, 0], self.port))];
        }

        let mut addrs = Vec::with_capacity(self.addresses.len());
        for text in &self.addresses {
            if let Ok(addr) = text.parse::<SocketAddr>() {
                addrs.push(addr);
            } else if let Ok(ip) = text.parse::<IpAddr>() {
                addrs.push(SocketAddr::new(ip, self.port));
            } else if let Ok(ip) = text.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
                addrs.push(SocketAddr::new(ip, self.port));
            } else {
                log::warn!("unparsable bind address {text:?}, skipped");
            }
        }
        addrs
    }

    /// The log filter matching the configured verbosity.
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Error,
            2 => log::LevelFilter::Warn,
            3 => log::LevelFilter::Info,
            4 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// The service-side flood options this configuration amounts to.
    pub fn flood_options(&self) -> FloodOptions {
        FloodOptions {
            max_tickets: self.flood.max_tickets,
            ticket_reset_period: self.flood.tickets_reset_time,
            ban_duration: self.flood.ban_time,
            forget_time: self.flood.forget_time,
            bad_message_tickets: self.flood.ticks_on_bad_message,
            session_timeout: self.session_timeout,
            max_sessions_per_peer: self.max_sessions_per_peer,
        }
    }
}

fn set<T>(slot: &mut T, key: &str, value: &str, default: T, warnings: &mut Vec<String>)
where
    T: std::str::FromStr + std::fmt::Display,
{
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => {
            warnings.push(format!(
                "invalid value {value:?} for ${key}, using {default}"
            ));
            *slot = default;
        }
    }
}

fn parse_bool(value: &str, key: &str, default: bool, warnings: &mut Vec<String>) -> bool {
    match value {
        "0" => false,
        "1" => true,
        _ => {
            warnings.push(format!(
                "invalid value {value:?} for ${key}, using {}",
                default as u8
            ));
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_prf_grammar() {
        let config = Config::parse(
            r#"
# comment
$name "Local Master"
$region US-East
$address 127.0.0.1
$address 10.0.0.1:28010
$port 28003
$heartbeat 300
$verbosity 4
$challengeMode 1
$flood::MaxTickets 500
"#,
        );

        assert_eq!(config.name, "Local Master");
        assert_eq!(config.region, "US-East");
        assert_eq!(config.port, 28003);
        assert_eq!(config.heartbeat, 300);
        assert_eq!(config.verbosity, 4);
        assert!(config.challenge_mode);
        assert_eq!(config.flood.max_tickets, 500);
        assert!(config.warnings.is_empty());

        let addrs = config.listen_addrs();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0], "127.0.0.1:28003".parse().unwrap());
        assert_eq!(addrs[1], "10.0.0.1:28010".parse().unwrap());
    }

    #[test]
    fn unknown_keys_and_bad_values_only_warn() {
        let config = Config::parse(
            r#"
$nosuchkey 1
$port notanumber
$verbosity 9
$maxSessionsPerPeer 50
"#,
        );

        assert_eq!(config.port, Config::default().port);
        assert_eq!(config.verbosity, 5);
        assert_eq!(config.max_sessions_per_peer, MAX_SESSIONS_PER_PEER);
        assert_eq!(config.warnings.len(), 4);
    }

    #[test]
    fn defaults_round_trip_through_the_file_format() {
        let written = Config::default().to_prf();
        let config = Config::parse(&written);

        assert_eq!(config.name, Config::default().name);
        assert_eq!(config.port, Config::default().port);
        assert_eq!(config.flood.max_tickets, Config::default().flood.max_tickets);
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn default_listen_is_the_wildcard() {
        let config = Config::default();
        assert_eq!(
            config.listen_addrs(),
            vec!["0.0.0.0:28002".parse().unwrap()]
        );
    }
}
