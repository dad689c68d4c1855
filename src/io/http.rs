use reqwest::{Client, Response};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::ByteSource;
use anyhow::{Result, bail};

/// Response chunks buffered between the network task and the parser
const CHANNEL_CAPACITY: usize = 16;

/// Multipart body streamed from an HTTP(S) response
///
/// A background task pulls chunks from the response and hands them over a
/// bounded channel, so the body is never held in memory as a whole. Reads
/// block the calling thread: use this source from a blocking task, never
/// directly on the async runtime.
pub struct HttpBodySource {
    receiver: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
    content_type: Option<String>,
    content_length: Option<u64>,
    transferred_bytes: Arc<AtomicU64>,
}

impl HttpBodySource {
    /// Send a GET request and start streaming the response body
    ///
    /// Connection failures and timeouts are retried with a growing delay.
    pub async fn open(url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        let max_retry = 10;

        let mut retry_count = 0;
        let resp = loop {
            match client.get(url).send().await {
                Ok(resp) => break resp,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= max_retry {
                        bail!("Max retries exceeded");
                    }
                    tracing::warn!("Connection error, retry {}/{}: {}", retry_count, max_retry, e);
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        if !resp.status().is_success() {
            bail!("HTTP request failed with status: {}", resp.status());
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = resp.content_length();

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let transferred_bytes = Arc::new(AtomicU64::new(0));
        tokio::spawn(pump(resp, sender, transferred_bytes.clone()));

        Ok(Self::from_channel(
            receiver,
            content_type,
            content_length,
            transferred_bytes,
        ))
    }

    fn from_channel(
        receiver: mpsc::Receiver<io::Result<Vec<u8>>>,
        content_type: Option<String>,
        content_length: Option<u64>,
        transferred_bytes: Arc<AtomicU64>,
    ) -> Self {
        Self {
            receiver,
            chunk: Vec::new(),
            pos: 0,
            content_type,
            content_length,
            transferred_bytes,
        }
    }

    /// `Content-Type` of the response, if it had one
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

/// Forward response chunks until the body ends or the reader goes away
async fn pump(
    mut resp: Response,
    sender: mpsc::Sender<io::Result<Vec<u8>>>,
    transferred_bytes: Arc<AtomicU64>,
) {
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                transferred_bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                if sender.send(Ok(chunk.to_vec())).await.is_err() {
                    tracing::debug!("body reader dropped, stopping download");
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = sender.send(Err(io::Error::other(e))).await;
                return;
            }
        }
    }
}

impl ByteSource for HttpBodySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            match self.receiver.blocking_recv() {
                Some(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_across_chunks_then_ends() {
        let (sender, receiver) = mpsc::channel(4);
        sender.blocking_send(Ok(b"abc".to_vec())).unwrap();
        sender.blocking_send(Ok(Vec::new())).unwrap();
        sender.blocking_send(Ok(b"defg".to_vec())).unwrap();
        drop(sender);

        let mut source = HttpBodySource::from_channel(
            receiver,
            Some("multipart/form-data; boundary=x".to_string()),
            Some(7),
            Arc::new(AtomicU64::new(7)),
        );
        assert_eq!(source.content_type(), Some("multipart/form-data; boundary=x"));
        assert_eq!(source.content_length(), Some(7));
        assert_eq!(source.transferred_bytes(), 7);

        let mut buf = [0u8; 2];
        let mut out = Vec::new();
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"abcdefg");
    }

    #[test]
    fn test_transport_error_is_surfaced() {
        let (sender, receiver) = mpsc::channel(2);
        sender.blocking_send(Ok(b"ab".to_vec())).unwrap();
        sender
            .blocking_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            .unwrap();
        drop(sender);

        let mut source =
            HttpBodySource::from_channel(receiver, None, None, Arc::new(AtomicU64::new(0)));
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(
            source.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
    }
}
