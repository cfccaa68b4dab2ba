//! One-shot HTTP server for client tests

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Answer a single request with `status` and `body`. The handle resolves to
/// the raw request text, with header names lowercased.
pub async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                if request.len() >= end + 4 + content_length(&text[..end]) {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;

        let text = String::from_utf8_lossy(&request).to_string();
        match text.split_once("\r\n\r\n") {
            Some((head, rest)) => {
                let mut lines = head.lines();
                let request_line = lines.next().unwrap_or_default().to_string();
                let headers: Vec<String> = lines
                    .map(|line| match line.split_once(':') {
                        Some((name, value)) => format!("{}:{}", name.to_lowercase(), value),
                        None => line.to_string(),
                    })
                    .collect();
                format!("{}\r\n{}\r\n\r\n{}", request_line, headers.join("\r\n"), rest)
            }
            None => text,
        }
    });

    (format!("http://{}", addr), handle)
}
