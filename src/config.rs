//! Configuration for redwire
//!
//! Centralized connection configuration with sensible defaults.
//! Everything here is consumed once, at connection-open time.

use std::time::Duration;

use url::Url;

use crate::error::{RedwireError, Result};

/// Wire dialect spoken on the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// RESP2 (default, no handshake needed)
    #[default]
    Resp2,

    /// RESP3, announced with `HELLO 3` right after connect
    Resp3,
}

impl ProtocolVersion {
    /// Numeric version as sent in `HELLO`
    pub fn number(self) -> u8 {
        match self {
            ProtocolVersion::Resp2 => 2,
            ProtocolVersion::Resp3 => 3,
        }
    }
}

/// Main configuration for a redwire client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Endpoint
    // -------------------------------------------------------------------------
    /// Server host name or IP
    pub host: String,

    /// Server TCP port
    pub port: u16,

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------
    /// ACL user name (only sent together with a password)
    pub username: Option<String>,

    /// Password for `AUTH` / `HELLO ... AUTH`
    pub password: Option<String>,

    /// Wire dialect
    pub protocol: ProtocolVersion,

    /// Database index selected after connect
    pub database: u32,

    /// Name registered with `CLIENT SETNAME`
    pub client_name: Option<String>,

    // -------------------------------------------------------------------------
    // Timeouts (milliseconds, 0 = none)
    // -------------------------------------------------------------------------
    /// TCP connect timeout
    pub connect_timeout_ms: u64,

    /// Local deadline for a request/reply round trip.
    /// The server-side timeout argument of blocking commands stays authoritative,
    /// so this defaults to none.
    pub read_timeout_ms: u64,

    /// Socket write timeout
    pub write_timeout_ms: u64,

    /// How long subscribe/unsubscribe wait for the server's confirmations
    pub confirm_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Tuning
    // -------------------------------------------------------------------------
    /// Size of a single socket read
    pub read_buffer_size: usize,

    /// Listener callbacks running longer than this are logged as slow
    pub slow_listener_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            protocol: ProtocolVersion::Resp2,
            database: 0,
            client_name: None,
            connect_timeout_ms: 5000,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
            confirm_timeout_ms: 5000,
            read_buffer_size: 16 * 1024, // 16 KB
            slow_listener_ms: 100,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a `redis://[user[:password]@]host[:port][/db][?protocol=3&name=x]` URL
    pub fn from_url(input: &str) -> Result<Self> {
        let url = Url::parse(input)
            .map_err(|e| RedwireError::Config(format!("invalid url {input:?}: {e}")))?;

        if url.scheme() != "redis" {
            return Err(RedwireError::Config(format!(
                "unsupported scheme {:?}, expected \"redis\"",
                url.scheme()
            )));
        }

        let mut builder = Config::builder();

        match url.host_str() {
            Some(host) if !host.is_empty() => builder = builder.host(host),
            _ => return Err(RedwireError::Config(format!("missing host in {input:?}"))),
        }
        if let Some(port) = url.port() {
            builder = builder.port(port);
        }

        if let Some(password) = url.password() {
            if !url.username().is_empty() {
                builder = builder.username(url.username());
            }
            builder = builder.password(password);
        } else if !url.username().is_empty() {
            // redis://secret@host is the classic password-only form
            builder = builder.password(url.username());
        }

        let path = url.path().trim_start_matches('/');
        if !path.is_empty() {
            let db = path
                .parse::<u32>()
                .map_err(|_| RedwireError::Config(format!("invalid database index {path:?}")))?;
            builder = builder.database(db);
        }

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "protocol" => {
                    let protocol = match value.as_ref() {
                        "2" => ProtocolVersion::Resp2,
                        "3" => ProtocolVersion::Resp3,
                        other => {
                            return Err(RedwireError::Config(format!(
                                "unsupported protocol {other:?}"
                            )))
                        }
                    };
                    builder = builder.protocol(protocol);
                }
                "name" => builder = builder.client_name(value.as_ref()),
                other => tracing::debug!("Ignoring unknown url parameter {}", other),
            }
        }

        Ok(builder.build())
    }

    /// `host:port` string used to connect
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub(crate) fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub(crate) fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub(crate) fn confirm_timeout(&self) -> Option<Duration> {
        millis(self.confirm_timeout_ms)
    }

    pub(crate) fn slow_listener(&self) -> Option<Duration> {
        millis(self.slow_listener_ms)
    }
}

fn millis(ms: u64) -> Option<Duration> {
    if ms > 0 {
        Some(Duration::from_millis(ms))
    } else {
        None
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the server host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the ACL user name
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Select the wire dialect
    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Set the database index selected after connect
    pub fn database(mut self, index: u32) -> Self {
        self.config.database = index;
        self
    }

    /// Set the client name
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = Some(name.into());
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the round-trip read deadline (in milliseconds, 0 = none)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set how long to wait for subscribe/unsubscribe confirmations (in milliseconds)
    pub fn confirm_timeout_ms(mut self, ms: u64) -> Self {
        self.config.confirm_timeout_ms = ms;
        self
    }

    /// Set the socket read chunk size (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the slow listener warning threshold (in milliseconds)
    pub fn slow_listener_ms(mut self, ms: u64) -> Self {
        self.config.slow_listener_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
