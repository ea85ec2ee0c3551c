use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::warn;

use crate::error::FetchError;

const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Anything that can hand back the body of a GET request, retrying on its own.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<String, FetchError>;
}

pub struct HttpClient {
    client: Client,
    max_attempts: u32,
    retry_pause: Duration,
}

impl HttpClient {
    pub fn new(user_agent: &str, max_attempts: u32) -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(HttpClient {
            client,
            max_attempts: max_attempts.max(1),
            retry_pause: RETRY_PAUSE,
        })
    }

    /// Wait `pause` between attempts instead of the default second.
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }
}

#[async_trait]
impl PageSource for HttpClient {
    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let mut last_status = None;
        let mut last_err = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_pause).await;
            }

            let resp = self
                .client
                .get(url)
                .query(query)
                .timeout(timeout)
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) => {
                    warn!("Failed to download {} #{}: {}", url, attempt, e);
                    last_err = Some(e);
                    continue;
                }
            };

            let status = resp.status();
            let body = match resp.text().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Failed to read {} #{}: {}", url, attempt, e);
                    last_err = Some(e);
                    continue;
                }
            };
            if status == StatusCode::OK {
                return Ok(body);
            }

            warn!("Failed to download {} #{}: {} {}", url, attempt, status.as_u16(), body);
            last_status = Some(status.as_u16());
        }

        match (last_status, last_err) {
            (None, Some(e)) => Err(FetchError::Http {
                url: url.to_string(),
                source: e,
            }),
            (status, _) => Err(FetchError::Exhausted {
                url: url.to_string(),
                status: status.unwrap_or_default(),
                attempts: self.max_attempts,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local server answering request `n` with `statuses[n]`, repeating the last status once
    /// the list runs out. Returns the base URL and a request counter.
    async fn serve(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).or(statuses.last()).copied().unwrap_or(200);

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }

                let body = format!("answer {}", status);
                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/", addr), hits)
    }

    fn client(max_attempts: u32) -> HttpClient {
        HttpClient::new("wishmap-test", max_attempts)
            .unwrap()
            .with_retry_pause(Duration::ZERO)
    }

    #[tokio::test]
    async fn retries_until_ok() {
        let (url, hits) = serve(vec![503, 503, 200]).await;
        let body = client(5)
            .get_text(&url, &[("grid-page", "1".to_string())], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(body, "answer 200");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (url, hits) = serve(vec![503]).await;
        let err = client(5)
            .get_text(&url, &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Exhausted {
                status: 503,
                attempts: 5,
                ..
            }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(2)
            .get_text(&format!("http://{}/", addr), &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Http { .. }));
    }
}
