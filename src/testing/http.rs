//! A throwaway HTTP/1.1 server for exercising the reqwest clients.
//!
//! Each canned response is served on its own connection, in order, with
//! `Connection: close`. The join handle resolves to the captured requests once
//! every response has been sent.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn bytes(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            content_type: "application/octet-stream",
            body: body.to_vec(),
        }
    }
}

/// Request line plus headers, and the body, as received.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: String,
}

/// Bind on an ephemeral localhost port and serve `responses` in order.
///
/// Returns the base URL (`http://127.0.0.1:<port>`) and the server task.
pub async fn serve(
    responses: Vec<CannedResponse>,
) -> std::io::Result<(String, JoinHandle<Vec<CapturedRequest>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);

    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for canned in responses {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let Some(request) = read_request(&mut sock).await else {
                break;
            };
            seen.push(request);

            let reason = if canned.status < 400 { "OK" } else { "Error" };
            let head = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\
                 Connection: close\r\n\r\n",
                canned.status,
                reason,
                canned.content_type,
                canned.body.len()
            );
            let _ = sock.write_all(head.as_bytes()).await;
            let _ = sock.write_all(&canned.body).await;
            let _ = sock.shutdown().await;
        }
        seen
    });

    Ok((base, handle))
}

async fn read_request(sock: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body_end = buf.len().min(header_end + content_length);
    Some(CapturedRequest {
        head,
        body: String::from_utf8_lossy(&buf[header_end..body_end]).into_owned(),
    })
}
