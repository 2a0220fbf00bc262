use std::{fmt, path::PathBuf};

use super::representation::Representation;
use crate::{
    decrypt,
    download::DownloadContext,
    error::{KasaneError, KasaneResult},
    fetch::Fetcher,
    options::DownloadOptions,
    process::ProcessRunner,
    util::path::{sanitize_file_component, Scope, ScopedDir},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
    Subtitle,
}

impl TrackKind {
    /// Classify a `mimeType` such as `video/mp4` or `application/ttml+xml`.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if mime_type.starts_with("audio/") {
            Some(Self::Audio)
        } else if mime_type.starts_with("video/") {
            Some(Self::Video)
        } else if mime_type.starts_with("text/") || mime_type == "application/ttml+xml" {
            Some(Self::Subtitle)
        } else {
            None
        }
    }

    /// Classify a `contentType` such as `audio` or `text`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type.trim() {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "text" => Some(Self::Subtitle),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Subtitle => "subtitle",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Audio => "m4a",
            Self::Video | Self::Subtitle => "mp4",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A group of interchangeable encodings of one track.
#[derive(Debug, Clone)]
pub struct AdaptationSet {
    /// `@id`, or the position inside the period when absent.
    pub id: String,
    pub mime_type: Option<String>,
    pub kind: Option<TrackKind>,
    pub lang: Option<String>,
    pub content_protection: bool,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    /// Whether the set, or any of its representations, carries `ContentProtection`.
    pub fn is_protected(&self) -> bool {
        self.content_protection
            || self
                .representations
                .iter()
                .any(|representation| representation.content_protection)
    }

    pub(crate) fn ensure_keys(&self, options: &DownloadOptions) -> KasaneResult<()> {
        if self.is_protected() && options.decrypt_keys.is_empty() {
            return Err(KasaneError::MissingKeys(self.id.clone()));
        }
        Ok(())
    }

    /// Download `representation`, decrypt it when keys are supplied and
    /// optionally defragment it. The result is placed in `parent`.
    ///
    /// Keys are applied to unprotected sets too, since some streams only
    /// signal CENC inside the init segment.
    pub(crate) async fn download<F, P>(
        &self,
        representation: &Representation,
        context: &DownloadContext<F, P>,
        options: &DownloadOptions,
        parent: &ScopedDir,
    ) -> KasaneResult<PathBuf>
    where
        F: Fetcher,
        P: ProcessRunner,
    {
        let kind = self.kind.ok_or_else(|| {
            KasaneError::NoRepresentation(format!("adaptation set {} of unknown type", self.id))
        })?;
        self.ensure_keys(options)?;

        tracing::debug!(adaptation_set = %self.id, lang = ?self.lang, "Downloading adaptation set");
        let dir = parent.child(Scope::AdaptationSet)?;
        let mut media = representation.download(context, options, kind, &dir).await?;

        if !options.decrypt_keys.is_empty() {
            media = decrypt::decrypt(context, &options.decrypt_keys, &media).await?;
        }

        if options.defragment {
            match decrypt::defragment(context, &media).await {
                Ok(defragmented) => media = defragmented,
                Err(KasaneError::Cancelled) => return Err(KasaneError::Cancelled),
                Err(e) => tracing::warn!(
                    "Failed to defragment {}, keeping the fragmented file. {e}",
                    media.display()
                ),
            }
        }

        parent
            .adopt_with_prefix(&media, &sanitize_file_component(&self.id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_kind() {
        assert_eq!(TrackKind::from_mime_type("video/mp4"), Some(TrackKind::Video));
        assert_eq!(TrackKind::from_mime_type("Audio/MP4"), Some(TrackKind::Audio));
        assert_eq!(TrackKind::from_mime_type("text/vtt"), Some(TrackKind::Subtitle));
        assert_eq!(TrackKind::from_mime_type("image/jpeg"), None);
        assert_eq!(TrackKind::from_content_type("audio"), Some(TrackKind::Audio));

        assert_eq!(TrackKind::Audio.extension(), "m4a");
        assert_eq!(TrackKind::Video.to_string(), "video");
    }
}
