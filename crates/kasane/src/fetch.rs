use std::future::Future;

use bytes::Bytes;
use reqwest::header::ACCEPT;
use url::Url;

use crate::{
    error::{KasaneError, KasaneResult},
    util::http::HttpClient,
};

/// Retrieves remote resources: the manifest, initialization segments and
/// media segments.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, url: &Url) -> impl Future<Output = KasaneResult<Bytes>> + Send;

    fn fetch_manifest(&self, url: &Url) -> impl Future<Output = KasaneResult<String>> + Send {
        async move {
            let bytes = self.fetch(url).await?;
            String::from_utf8(bytes.to_vec())
                .map_err(|e| KasaneError::Parse(format!("manifest is not valid UTF-8: {e}")))
        }
    }
}

impl Fetcher for HttpClient {
    async fn fetch(&self, url: &Url) -> KasaneResult<Bytes> {
        let response = self.get(url.clone()).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            if let Ok(body) = response.text().await {
                tracing::warn!("Error body: {body}");
            }
            return Err(KasaneError::HttpError(status));
        }

        Ok(response.bytes().await?)
    }

    async fn fetch_manifest(&self, url: &Url) -> KasaneResult<String> {
        let response = self
            .get(url.clone())
            .header(ACCEPT, "application/dash+xml,video/vnd.mpeg.dash.mpd")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(KasaneError::HttpError(response.status()));
        }

        Ok(response.text().await?)
    }
}
