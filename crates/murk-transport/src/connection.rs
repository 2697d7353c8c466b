use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio::net::TcpStream;

use crate::frame::{read_request, read_response, write_request, write_response};
use crate::{MurkTransportError, Request, Response, TransportConfig};

/// One transport connection.
///
/// Generic over the stream so the engines can be exercised against
/// `tokio::io::duplex` pipes in tests. Every frame operation carries the
/// configured timeout; a timeout closes nothing by itself but is
/// reported so the caller can tear the connection down.
pub struct Connection<S> {
    stream: BufStream<S>,
    config: TransportConfig,
    peer_addr: Option<SocketAddr>,
}

impl Connection<TcpStream> {
    /// Open an outbound TCP connection to a relay.
    pub async fn open(
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<Self, MurkTransportError> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MurkTransportError::Timeout(config.connect_timeout))?
            .map_err(|source| MurkTransportError::Connect { addr, source })?;
        Ok(Self::from_stream(stream, config))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Wrap an already-established stream (accepted TCP, duplex pipe).
    pub fn from_stream(stream: S, config: TransportConfig) -> Self {
        Self {
            stream: BufStream::new(stream),
            config,
            peer_addr: None,
        }
    }

    /// Record the remote address for logging and peer records.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub async fn send_request(&mut self, request: &Request) -> Result<(), MurkTransportError> {
        let deadline = self.config.io_timeout;
        timed(deadline, write_request(&mut self.stream, request)).await
    }

    pub async fn recv_request(&mut self) -> Result<Request, MurkTransportError> {
        let deadline = self.config.io_timeout;
        let max_body = self.config.max_body;
        timed(deadline, read_request(&mut self.stream, max_body)).await
    }

    pub async fn send_response(&mut self, response: &Response) -> Result<(), MurkTransportError> {
        let deadline = self.config.io_timeout;
        timed(deadline, write_response(&mut self.stream, response)).await
    }

    pub async fn recv_response(&mut self) -> Result<Response, MurkTransportError> {
        let deadline = self.config.io_timeout;
        let max_body = self.config.max_body;
        timed(deadline, read_response(&mut self.stream, max_body)).await
    }

    /// One client-side exchange: write the request, read the reply.
    pub async fn round_trip(&mut self, request: &Request) -> Result<Response, MurkTransportError> {
        self.send_request(request).await?;
        self.recv_response().await
    }
}

async fn timed<T>(
    deadline: Duration,
    op: impl std::future::Future<Output = Result<T, MurkTransportError>>,
) -> Result<T, MurkTransportError> {
    tokio::time::timeout(deadline, op)
        .await
        .map_err(|_| MurkTransportError::Timeout(deadline))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SessionId, Status};

    #[tokio::test]
    async fn duplex_request_response() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::from_stream(client_io, TransportConfig::new());
        let mut server = Connection::from_stream(server_io, TransportConfig::new());

        let server_task = tokio::spawn(async move {
            let request = server.recv_request().await.unwrap();
            assert_eq!(request.session, Some(SessionId::from_raw(7)));
            assert_eq!(request.body, b"ping");
            server
                .send_response(&Response::new(Status::Ok, b"pong".to_vec()))
                .await
                .unwrap();
        });

        let request = Request::new(Some(SessionId::from_raw(7)), b"ping".to_vec());
        let response = client.round_trip(&request).await.unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body, b"pong");

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn recv_times_out_without_data() {
        let (client_io, _server_io) = tokio::io::duplex(1024);
        let config = TransportConfig::new().io_timeout(Duration::from_millis(50));
        let mut client = Connection::from_stream(client_io, config);

        let err = client.recv_response().await.unwrap_err();
        assert!(matches!(err, MurkTransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn pipelined_exchanges_on_one_connection() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::from_stream(client_io, TransportConfig::new());
        let mut server = Connection::from_stream(server_io, TransportConfig::new());

        let server_task = tokio::spawn(async move {
            for _ in 0..3 {
                let request = server.recv_request().await.unwrap();
                server
                    .send_response(&Response::new(Status::Ok, request.body))
                    .await
                    .unwrap();
            }
        });

        for i in 0..3u8 {
            let response = client
                .round_trip(&Request::new(None, vec![i; 4]))
                .await
                .unwrap();
            assert_eq!(response.body, vec![i; 4]);
        }

        server_task.await.unwrap();
    }
}
