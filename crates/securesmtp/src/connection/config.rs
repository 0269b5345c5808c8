//! Connection configuration types.

use std::fmt;
use std::time::Duration;

/// Default submission port for STARTTLS.
pub const DEFAULT_PORT: u16 = 587;

/// Default command timeout in whole seconds.
pub const DEFAULT_COMMAND_TIMEOUT: u32 = 3;

/// Server address the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Server hostname.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Hostname with any IPv6 brackets removed, as resolvers and TLS
    /// server names expect it.
    #[must_use]
    pub fn bare_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Where trusted root certificates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustStoreSource {
    /// Roots compiled into the binary (Mozilla set via `webpki-roots`).
    #[default]
    BuiltIn,
    /// Every certificate found in the operating system store.
    System,
}

/// Secure SMTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    endpoint: Endpoint,
    command_timeout: u32,
    connect_timeout: Duration,
    trust_store: TrustStoreSource,
    ehlo_hostname: String,
}

impl ClientConfig {
    /// Creates a configuration for `host` on the submission port.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ClientConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(host)
    }

    /// Server endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Seconds to wait for a reply after each command.
    #[must_use]
    pub const fn command_timeout(&self) -> u32 {
        self.command_timeout
    }

    /// Bound on the plain TCP connect.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Trust store population strategy.
    #[must_use]
    pub const fn trust_store(&self) -> TrustStoreSource {
        self.trust_store
    }

    /// Name sent with EHLO.
    #[must_use]
    pub fn ehlo_hostname(&self) -> &str {
        &self.ehlo_hostname
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    host: String,
    port: u16,
    command_timeout: u32,
    connect_timeout: Duration,
    trust_store: TrustStoreSource,
    ehlo_hostname: String,
}

impl ClientConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: Duration::from_secs(30),
            trust_store: TrustStoreSource::default(),
            ehlo_hostname: "localhost".to_string(),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the command timeout in seconds.
    #[must_use]
    pub const fn command_timeout(mut self, seconds: u32) -> Self {
        self.command_timeout = seconds;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the trust store source.
    #[must_use]
    pub const fn trust_store(mut self, source: TrustStoreSource) -> Self {
        self.trust_store = source;
        self
    }

    /// Sets the hostname announced with EHLO.
    #[must_use]
    pub fn ehlo_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.ehlo_hostname = hostname.into();
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        ClientConfig {
            endpoint: Endpoint::new(self.host, self.port),
            command_timeout: self.command_timeout,
            connect_timeout: self.connect_timeout,
            trust_store: self.trust_store,
            ehlo_hostname: self.ehlo_hostname,
        }
    }
}
