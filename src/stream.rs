//! Byte transport: plain TCP, TLS, or an in-memory duplex pipe.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;

#[cfg(feature = "tls")]
use tokio_native_tls::TlsStream;

/// The connection's duplex byte channel. The driver task owns it
/// exclusively; callers never touch the socket.
pub enum Stream {
    /// Plain TCP
    Tcp(TcpStream),
    /// TLS over TCP, after a successful SSLRequest negotiation
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
    /// In-memory pipe, for embedding and tests
    Duplex(DuplexStream),
}

impl Stream {
    /// Wrap a TCP stream.
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }

    /// Wrap an in-memory duplex stream.
    pub fn duplex(stream: DuplexStream) -> Self {
        Self::Duplex(stream)
    }

    /// Upgrade a TCP stream to TLS.
    ///
    /// Returns an error for non-TCP variants or a failed handshake.
    #[cfg(feature = "tls")]
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self, crate::error::Error> {
        match self {
            Stream::Tcp(tcp) => {
                let connector =
                    tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
                let tls = connector
                    .connect(host, tcp)
                    .await
                    .map_err(crate::error::Error::Tls)?;
                Ok(Stream::Tls(Box::new(tls)))
            }
            _ => Err(crate::error::Error::InvalidUsage(
                "only a plain TCP stream can be upgraded to TLS".into(),
            )),
        }
    }

    /// Read a single byte (the SSLRequest answer).
    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        match self {
            Stream::Tcp(s) => s.read_u8().await,
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read_u8().await,
            Stream::Duplex(s) => s.read_u8().await,
        }
    }

    /// Read the next inbound chunk. Returns 0 at EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf).await,
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf).await,
            Stream::Duplex(s) => s.read(buf).await,
        }
    }

    /// Write the full buffer.
    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.write_all(buf).await,
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.write_all(buf).await,
            Stream::Duplex(s) => s.write_all(buf).await,
        }
    }

    /// Flush buffered writes.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush().await,
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.flush().await,
            Stream::Duplex(s) => s.flush().await,
        }
    }
}
