use gantry_engine::services::{FetchFailure, ResourceFetcher};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Downloads dependency artifacts over HTTP, streaming each body straight
/// to its destination file.
///
/// 404/410 mean the artifact does not exist and will not appear on a retry;
/// every other HTTP or network problem is reported transient so the setup
/// retry budget can absorb it. Local disk errors are their own kind.
pub struct HttpResourceFetcher {
    client: reqwest::Client,
}

impl HttpResourceFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<(), FetchFailure> {
        let mut response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| transient(uri, e))?;

        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 410 {
            return Err(FetchFailure::NotFound(uri.to_string()));
        }
        if !status.is_success() {
            return Err(FetchFailure::Transient {
                uri: uri.to_string(),
                reason: format!("status {}", status.as_u16()),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await.map_err(|e| transient(uri, e))? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(uri = %uri, dest = %dest.display(), "dependency downloaded");
        Ok(())
    }
}

fn transient(uri: &str, err: reqwest::Error) -> FetchFailure {
    FetchFailure::Transient {
        uri: uri.to_string(),
        reason: err.to_string(),
    }
}
