//! Click ControlSocket client.
//!
//! Each call opens a fresh TCP connection to `address:channel`, reads the
//! `Click::ControlSocket/<ver>` banner, sends one `READ`/`WRITE` line and
//! parses the status line (plus `DATA <n>` payload for reads).

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::trace;

use super::{CallReply, ControlError, ControlTransport};

const BANNER_PREFIX: &str = "Click::ControlSocket/";

/// Largest DATA payload accepted from a handler read.
const MAX_DATA_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
enum Verb {
    Read,
    Write,
}

pub struct ClickClient {
    timeout: Option<Duration>,
}

impl ClickClient {
    /// `timeout` bounds each call end-to-end; `None` waits forever.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    async fn bounded<F>(
        &self,
        address: &str,
        channel: u16,
        fut: F,
    ) -> Result<CallReply, ControlError>
    where
        F: Future<Output = Result<CallReply, ControlError>>,
    {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| ControlError::Timeout {
                    address: address.to_string(),
                    channel,
                    timeout,
                })?,
            None => fut.await,
        }
    }
}

/// Turn `"src.rate 100"` into the request line `"WRITE src.rate 100"`.
fn request_line(verb: Verb, command: &str) -> String {
    let command = command.trim();
    match verb {
        Verb::Read => format!("READ {}\r\n", command),
        Verb::Write => format!("WRITE {}\r\n", command),
    }
}

/// Split `"200 Read handler 'x' OK"` into its code.
fn parse_status(line: &str) -> Option<u16> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    code.parse().ok()
}

async fn call(
    address: &str,
    channel: u16,
    verb: Verb,
    command: &str,
) -> Result<CallReply, ControlError> {
    let io_err = |source: std::io::Error| ControlError::Io {
        address: address.to_string(),
        channel,
        source,
    };
    let protocol_err = |detail: String| ControlError::Protocol {
        address: address.to_string(),
        channel,
        detail,
    };

    let stream = TcpStream::connect((address, channel)).await.map_err(io_err)?;
    let mut stream = BufReader::new(stream);
    let mut line = String::new();

    stream.read_line(&mut line).await.map_err(io_err)?;
    if !line.starts_with(BANNER_PREFIX) {
        return Err(protocol_err(format!("unexpected banner {:?}", line.trim_end())));
    }

    let request = request_line(verb, command);
    trace!(%address, channel, request = request.trim_end(), "control request");
    stream.get_mut().write_all(request.as_bytes()).await.map_err(io_err)?;

    line.clear();
    if stream.read_line(&mut line).await.map_err(io_err)? == 0 {
        return Err(protocol_err("connection closed before status line".to_string()));
    }
    let status = parse_status(&line)
        .ok_or_else(|| protocol_err(format!("bad status line {:?}", line.trim_end())))?;

    let mut reply = CallReply::with_status(command, status);
    if !reply.is_success() || matches!(verb, Verb::Write) {
        return Ok(reply);
    }

    line.clear();
    stream.read_line(&mut line).await.map_err(io_err)?;
    let len: usize = line
        .trim_end()
        .strip_prefix("DATA ")
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(|| protocol_err(format!("expected DATA line, got {:?}", line.trim_end())))?;
    if len > MAX_DATA_LEN {
        return Err(protocol_err(format!("DATA length {} exceeds limit", len)));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await.map_err(io_err)?;
    reply.value = Some(String::from_utf8_lossy(&data).into_owned());
    Ok(reply)
}

#[async_trait::async_trait]
impl ControlTransport for ClickClient {
    async fn write(
        &self,
        address: &str,
        channel: u16,
        command: &str,
    ) -> Result<CallReply, ControlError> {
        self.bounded(address, channel, call(address, channel, Verb::Write, command))
            .await
    }

    async fn read(
        &self,
        address: &str,
        channel: u16,
        command: &str,
    ) -> Result<CallReply, ControlError> {
        self.bounded(address, channel, call(address, channel, Verb::Read, command))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one connection, record the request line and answer with `response`.
    async fn fake_router(response: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            socket
                .get_mut()
                .write_all(b"Click::ControlSocket/1.3\r\n")
                .await
                .unwrap();
            let mut request = String::new();
            socket.read_line(&mut request).await.unwrap();
            socket.get_mut().write_all(response.as_bytes()).await.unwrap();
            request
        });
        (port, handle)
    }

    #[test]
    fn test_status_line_parsing() {
        assert_eq!(parse_status("200 Write handler 'src.rate' OK\r\n"), Some(200));
        assert_eq!(parse_status("511 No element named 'foo'\r\n"), Some(511));
        assert_eq!(parse_status("OK"), None);
        assert_eq!(parse_status(""), None);
    }

    #[tokio::test]
    async fn test_read_returns_data_payload() {
        let response = "200 Read handler 'counter_client.count' OK\r\nDATA 4\r\n1234";
        let (port, server) = fake_router(response).await;
        let client = ClickClient::new(Some(Duration::from_secs(5)));

        let reply = client.read("127.0.0.1", port, "counter_client.count").await.unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.parse_value::<u64>().unwrap(), 1234);
        assert_eq!(server.await.unwrap(), "READ counter_client.count\r\n");
    }

    #[tokio::test]
    async fn test_write_reports_error_status() {
        let (port, server) = fake_router("520 Write handler 'src.rate' error\r\n").await;
        let client = ClickClient::new(Some(Duration::from_secs(5)));

        let reply = client.write("127.0.0.1", port, "src.rate 100").await.unwrap();
        assert_eq!(reply.status, 520);
        assert!(!reply.is_success());
        assert_eq!(reply.value, None);
        assert_eq!(server.await.unwrap(), "WRITE src.rate 100\r\n");
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = ClickClient::new(Some(Duration::from_millis(100)));
        let err = client.read("127.0.0.1", port, "tr_client.interval").await.unwrap_err();
        assert!(matches!(err, ControlError::Timeout { .. }));
    }
}
