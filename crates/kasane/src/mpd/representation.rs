use std::path::PathBuf;

use url::Url;

use super::{adaptation::TrackKind, segment::SegmentTemplate};
use crate::{
    download::DownloadContext,
    error::{KasaneError, KasaneResult},
    fetch::Fetcher,
    options::DownloadOptions,
    process::ProcessRunner,
    util::path::{sanitize_file_component, Scope, ScopedDir},
};

/// One encoded variant of a track.
#[derive(Debug, Clone)]
pub struct Representation {
    pub id: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub audio_sampling_rate: Option<String>,
    pub audio_channels: Option<String>,
    pub content_protection: bool,
    /// Fully resolved, including every nested `BaseURL`.
    pub base_url: Url,
    /// The representation's own template, or the one inherited from its
    /// adaptation set. `None` for addressing modes other than templates.
    pub segment_template: Option<SegmentTemplate>,
}

impl Representation {
    pub fn resolution(&self) -> Option<String> {
        Some(format!("{}x{}", self.width?, self.height?))
    }

    pub(crate) async fn download<F, P>(
        &self,
        context: &DownloadContext<F, P>,
        options: &DownloadOptions,
        kind: TrackKind,
        parent: &ScopedDir,
    ) -> KasaneResult<PathBuf>
    where
        F: Fetcher,
        P: ProcessRunner,
    {
        let template = self.segment_template.as_ref().ok_or_else(|| {
            KasaneError::Parse(format!(
                "representation {:?} has no SegmentTemplate",
                self.id
            ))
        })?;

        tracing::info!(
            representation = ?self.id,
            codecs = ?self.codecs,
            resolution = ?self.resolution(),
            bandwidth = ?self.bandwidth,
            "Downloading {} representation",
            kind.name()
        );

        let dir = parent.child(Scope::Representation)?;
        let output = dir.join(format!(
            "{}-{}.{}",
            kind.name(),
            sanitize_file_component(self.id.as_deref().unwrap_or("unnamed")),
            kind.extension()
        ));
        template
            .download(
                context,
                options,
                &self.base_url,
                self.id.as_deref(),
                self.bandwidth,
                &dir,
                &output,
            )
            .await?;

        parent.adopt(&output).await
    }
}
