//! TCP forwarder: one frame per `forward` call, terminated by the
//! configured newline sequence. The connection is reused across calls when
//! `keep_alive` is set; on a send error the connection is dropped and
//! reconnected on the next attempt.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::retry::forward_with_retry;
use crate::{ConnectionState, ForwardOutcome, ForwardResult, Forwarder, ForwarderError, ForwarderStats, ForwarderStatsSnapshot, RetryPolicy};

#[derive(Debug, Clone)]
pub struct TcpForwarderConfig {
    pub address: String,
    pub port: u16,
    pub keep_alive: bool,
    pub newline: Vec<u8>,
    pub connect_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

struct Conn {
    stream: Option<TcpStream>,
    state: ConnectionState,
}

pub struct TcpForwarder {
    config: TcpForwarderConfig,
    conn: Mutex<Conn>,
    stats: ForwarderStats,
}

impl TcpForwarder {
    pub fn new(config: TcpForwarderConfig) -> Result<Self, ForwarderError> {
        if config.address.is_empty() {
            return Err(ForwarderError::Config("tcp forwarder requires a non-empty address".to_string()));
        }
        Ok(TcpForwarder { config, conn: Mutex::new(Conn { stream: None, state: ConnectionState::Disconnected }), stats: ForwarderStats::default() })
    }

    async fn connect(&self) -> Result<TcpStream, std::io::Error> {
        let addr = format!("{}:{}", self.config.address, self.config.port);
        tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "tcp connect timed out"))?
    }
}

#[async_trait::async_trait]
impl Forwarder for TcpForwarder {
    async fn forward(&self, payload: &[u8]) -> ForwardResult {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&self.config.newline);

        let result = forward_with_retry(&self.config.retry_policy, |_attempt| {
            let frame = frame.clone();
            async move {
                let mut guard = self.conn.lock().await;
                if guard.stream.is_none() || !self.config.keep_alive {
                    guard.state = ConnectionState::Connecting;
                    match self.connect().await {
                        Ok(stream) => {
                            guard.stream = Some(stream);
                            guard.state = ConnectionState::Connected;
                        }
                        Err(e) => {
                            guard.state = ConnectionState::Error;
                            return Err(ForwardOutcome::transient(format!("connect failed: {e}")));
                        }
                    }
                }
                let stream = guard.stream.as_mut().expect("connected above");
                match stream.write_all(&frame).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        guard.stream = None;
                        guard.state = ConnectionState::Error;
                        Err(ForwardOutcome::transient(format!("write failed: {e}")))
                    }
                }
            }
        })
        .await;
        self.stats.record(&result);
        result
    }

    async fn close(&self) {
        let mut guard = self.conn.lock().await;
        guard.stream = None;
        guard.state = ConnectionState::Disconnected;
    }

    fn stats(&self) -> ForwarderStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_payload_with_configured_newline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let forwarder = TcpForwarder::new(TcpForwarderConfig {
            address: addr.ip().to_string(),
            port: addr.port(),
            keep_alive: true,
            newline: b"\n".to_vec(),
            connect_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::none(),
        })
        .unwrap();

        let result = forwarder.forward(b"hello").await;
        assert_eq!(result.status, crate::ForwardStatus::Success);
        let received = server.await.unwrap();
        assert_eq!(received, b"hello\n");
    }
}
