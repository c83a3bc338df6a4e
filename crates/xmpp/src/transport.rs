use natter_core::config::Config;
use natter_core::jid::{self, BareJid};

use crate::error::ConnectionError;

pub const DEFAULT_PORT: u16 = 5222;
pub const DEFAULT_TLS_PORT: u16 = 5223;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub jid: BareJid,
    pub password: String,
    pub resource: String,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    pub timeout_seconds: u32,
}

impl ConnectionConfig {
    pub fn from_config(config: &Config) -> Result<Self, ConnectionError> {
        Ok(Self {
            jid: jid::bare(&config.account.jid)?,
            password: config.account.password.clone(),
            resource: config.account.resource.clone(),
            server: config.account.server.clone(),
            port: config.account.port,
            tls: config.account.tls,
            timeout_seconds: u32::try_from(config.session.connect_timeout_seconds)
                .unwrap_or(u32::MAX),
        })
    }

    /// Host to dial: the configured server, else the JID's domain.
    pub fn host(&self) -> &str {
        self.server
            .as_deref()
            .filter(|server| !server.is_empty())
            .unwrap_or_else(|| self.domain())
    }

    pub fn effective_port(&self) -> u16 {
        self.port
            .unwrap_or(if self.tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT })
    }

    /// The domain announced in the stream header.
    pub fn domain(&self) -> &str {
        self.jid.domain().as_str()
    }

    pub fn username(&self) -> &str {
        jid::node_or_bare(&self.jid)
    }
}

/// Byte-level XMPP transport.
///
/// The native implementation is `TcpTransport` (plain TCP or direct TLS);
/// tests substitute scripted transports.
pub trait XmppTransport: Send + 'static {
    fn connect(
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self, ConnectionError>> + Send
    where
        Self: Sized;

    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Reads the next chunk of bytes. An empty read means the peer closed
    /// the connection and is reported as `ConnectionError::Closed`.
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, ConnectionError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}

#[cfg(feature = "native")]
mod native {
    use std::sync::{Arc, Once};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_rustls::TlsConnector;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tracing::{debug, warn};

    use super::*;

    const MIN_TIMEOUT_SECONDS: u64 = 1;
    const RECV_BUFFER_SIZE: usize = 16 * 1024;

    enum NativeStream {
        Plain(TcpStream),
        Tls(Box<TlsStream<TcpStream>>),
    }

    pub struct TcpTransport {
        stream: NativeStream,
        read_buffer: Box<[u8]>,
    }

    fn connect_timeout(config: &ConnectionConfig) -> Duration {
        Duration::from_secs(u64::from(config.timeout_seconds).max(MIN_TIMEOUT_SECONDS))
    }

    fn init_crypto_provider() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
    }

    fn tls_connector() -> Result<TlsConnector, ConnectionError> {
        init_crypto_provider();

        let mut roots = RootCertStore::empty();
        let native_certs = rustls_native_certs::load_native_certs();
        for error in &native_certs.errors {
            warn!(%error, "failed to load a system root certificate");
        }
        if native_certs.certs.is_empty() {
            return Err(ConnectionError::TlsHandshakeFailed(
                "no system root certificates found".to_string(),
            ));
        }
        for cert in native_certs.certs {
            roots.add(cert).map_err(|error| {
                ConnectionError::TlsHandshakeFailed(format!("failed to add root certificate: {error}"))
            })?;
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }

    async fn dial(host: &str, port: u16) -> Result<TcpStream, ConnectionError> {
        let addresses: Vec<_> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|error| ConnectionError::DnsResolutionFailed(format!("{host}: {error}")))?
            .collect();
        if addresses.is_empty() {
            return Err(ConnectionError::DnsResolutionFailed(format!(
                "{host}: no addresses found"
            )));
        }

        TcpStream::connect(addresses.as_slice())
            .await
            .map_err(|error| ConnectionError::TransportError(format!("{host}:{port}: {error}")))
    }

    async fn upgrade_to_tls(
        tcp: TcpStream,
        host: &str,
    ) -> Result<TlsStream<TcpStream>, ConnectionError> {
        let connector = tls_connector()?;
        let server_name = ServerName::try_from(host.to_string()).map_err(|error| {
            ConnectionError::TlsHandshakeFailed(format!("invalid server name {host}: {error}"))
        })?;

        connector
            .connect(server_name, tcp)
            .await
            .map_err(|error| ConnectionError::TlsHandshakeFailed(error.to_string()))
    }

    impl XmppTransport for TcpTransport {
        async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
            let host = config.host().to_string();
            let port = config.effective_port();
            debug!(host = %host, port, tls = config.tls, "connecting");

            let establish = async {
                let tcp = dial(&host, port).await?;
                if config.tls {
                    let tls = upgrade_to_tls(tcp, &host).await?;
                    Ok::<_, ConnectionError>(NativeStream::Tls(Box::new(tls)))
                } else {
                    Ok(NativeStream::Plain(tcp))
                }
            };

            let stream = timeout(connect_timeout(config), establish)
                .await
                .map_err(|_| ConnectionError::Timeout)??;

            Ok(Self {
                stream,
                read_buffer: vec![0; RECV_BUFFER_SIZE].into_boxed_slice(),
            })
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
            match &mut self.stream {
                NativeStream::Plain(stream) => {
                    stream.write_all(data).await?;
                    stream.flush().await?;
                }
                NativeStream::Tls(stream) => {
                    stream.write_all(data).await?;
                    stream.flush().await?;
                }
            }
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
            let read = match &mut self.stream {
                NativeStream::Plain(stream) => stream.read(&mut self.read_buffer).await?,
                NativeStream::Tls(stream) => stream.read(&mut self.read_buffer).await?,
            };
            if read == 0 {
                return Err(ConnectionError::Closed);
            }
            Ok(self.read_buffer[..read].to_vec())
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            match &mut self.stream {
                NativeStream::Plain(stream) => stream.shutdown().await?,
                NativeStream::Tls(stream) => stream.shutdown().await?,
            }
            Ok(())
        }
    }
}

#[cfg(feature = "native")]
pub use native::TcpTransport;

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jid: &str) -> ConnectionConfig {
        ConnectionConfig {
            jid: jid::bare(jid).unwrap(),
            password: "secret".to_string(),
            resource: "natter".to_string(),
            server: None,
            port: None,
            tls: false,
            timeout_seconds: 30,
        }
    }

    #[test]
    fn host_defaults_to_jid_domain() {
        let config = config("alice@example.com/home");
        assert_eq!(config.host(), "example.com");
        assert_eq!(config.domain(), "example.com");
        assert_eq!(config.username(), "alice");
    }

    #[test]
    fn explicit_server_overrides_host() {
        let mut config = config("alice@example.com");
        config.server = Some("xmpp.example.net".to_string());
        assert_eq!(config.host(), "xmpp.example.net");
        assert_eq!(config.domain(), "example.com");
    }

    #[test]
    fn domain_only_account_logs_in_with_whole_address() {
        let config = config("example.com");
        assert_eq!(config.domain(), "example.com");
        assert_eq!(config.username(), "example.com");
    }

    #[test]
    fn malformed_account_jid_is_rejected() {
        let toml = "[account]\njid = \"alice@example.com\"\npassword = \"pw\"\n";
        let mut config = Config::from_toml(toml).unwrap();
        config.account.jid = "@example.com".to_string();
        assert!(matches!(
            ConnectionConfig::from_config(&config),
            Err(ConnectionError::InvalidJid(_))
        ));
    }

    #[test]
    fn default_port_depends_on_tls() {
        let mut config = config("alice@example.com");
        assert_eq!(config.effective_port(), DEFAULT_PORT);
        config.tls = true;
        assert_eq!(config.effective_port(), DEFAULT_TLS_PORT);
        config.port = Some(15222);
        assert_eq!(config.effective_port(), 15222);
    }
}
