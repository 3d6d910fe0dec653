use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::warn;

/// Server configuration, loaded once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub appendonly: bool,
    pub appendfilename: String,
    pub maxclients: usize,
    pub requirepass: Option<String>,
    pub databases: usize,
    pub dbfilename: String,
    pub masterauth: Option<String>,
    pub slave_announce_port: u16,
    pub slave_announce_ip: String,
    pub repl_timeout: u64,
    /// Addresses of the other cluster nodes. Membership is static; there is
    /// no gossip.
    pub peers: Vec<String>,
    /// This node's own advertised address. Cluster mode is enabled when set
    /// together with a non-empty peer list.
    pub self_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            appendonly: false,
            appendfilename: "appendonly.aof".to_string(),
            maxclients: 0,
            requirepass: None,
            databases: 16,
            dbfilename: "dump.rdb".to_string(),
            masterauth: None,
            slave_announce_port: 0,
            slave_announce_ip: String::new(),
            repl_timeout: 0,
            peers: Vec::new(),
            self_addr: String::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> io::Result<Config> {
        let file = File::open(path)?;
        Ok(Self::parse(file))
    }

    /// Parse a redis.conf-style stream: one `key value` pair per line, `#`
    /// starts a comment line, blank lines are skipped, booleans are
    /// `yes`/`no` and list values are comma separated.
    pub fn parse(src: impl Read) -> Config {
        let mut config = Config::default();
        let reader = BufReader::new(src);

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("failed to read config line: {err}");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(' ') {
                Some((key, value)) => (key.to_ascii_lowercase(), value.trim()),
                None => continue,
            };
            config.apply(&key, value);
        }

        config
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "bind" => self.bind = value.to_string(),
            "port" => match value.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("invalid port value: {value}"),
            },
            "appendonly" => self.appendonly = value == "yes",
            "appendfilename" => self.appendfilename = value.to_string(),
            "maxclients" => self.maxclients = value.parse().unwrap_or(0),
            "requirepass" => {
                if !value.is_empty() {
                    self.requirepass = Some(value.to_string());
                }
            }
            "databases" => {
                match value.parse::<usize>() {
                    Ok(n) if n > 0 => self.databases = n,
                    _ => warn!("invalid databases value: {value}"),
                };
            }
            "dbfilename" => self.dbfilename = value.to_string(),
            "masterauth" => {
                if !value.is_empty() {
                    self.masterauth = Some(value.to_string());
                }
            }
            "slave-announce-port" => self.slave_announce_port = value.parse().unwrap_or(0),
            "slave-announce-ip" => self.slave_announce_ip = value.to_string(),
            "repl-timeout" => self.repl_timeout = value.parse().unwrap_or(0),
            "peers" => {
                self.peers = value
                    .split(',')
                    .map(|peer| peer.trim().to_string())
                    .filter(|peer| !peer.is_empty())
                    .collect();
            }
            "self" => self.self_addr = value.to_string(),
            _ => warn!("unknown config key: {key}"),
        }
    }

    pub fn cluster_enabled(&self) -> bool {
        !self.self_addr.is_empty() && !self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let src = "\
# example config
bind 0.0.0.0
port 6399

appendonly yes
appendfilename test.aof
requirepass sekrit
databases 4
maxclients 128
";
        let config = Config::parse(src.as_bytes());
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 6399);
        assert!(config.appendonly);
        assert_eq!(config.appendfilename, "test.aof");
        assert_eq!(config.requirepass.as_deref(), Some("sekrit"));
        assert_eq!(config.databases, 4);
        assert_eq!(config.maxclients, 128);
    }

    #[test]
    fn parses_peer_list() {
        let src = "self 127.0.0.1:6399\npeers 127.0.0.1:7379,127.0.0.1:7380\n";
        let config = Config::parse(src.as_bytes());
        assert_eq!(config.self_addr, "127.0.0.1:6399");
        assert_eq!(
            config.peers,
            vec!["127.0.0.1:7379".to_string(), "127.0.0.1:7380".to_string()]
        );
        assert!(config.cluster_enabled());
    }

    #[test]
    fn defaults_survive_bad_input() {
        let src = "port notanumber\nappendonly maybe\n";
        let config = Config::parse(src.as_bytes());
        assert_eq!(config.port, 6379);
        assert!(!config.appendonly);
        assert_eq!(config.databases, 16);
        assert!(!config.cluster_enabled());
    }
}
