use std::path::PathBuf;

use url::Url;

use super::{adaptation::AdaptationSet, representation::Representation, TrackKind};
use crate::{
    download::DownloadContext,
    error::{KasaneError, KasaneResult},
    fetch::Fetcher,
    merge,
    options::{DownloadOptions, MergeStrategy},
    process::ProcessRunner,
    select::select_representation,
    util::path::{sanitize_file_component, Scope, ScopedDir},
};

#[derive(Debug, Clone)]
pub struct Period {
    /// `@id`, or the position inside the manifest when absent.
    pub id: String,
    pub start_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    /// Fully resolved against the manifest base URL.
    pub base_url: Url,
    pub adaptation_sets: Vec<AdaptationSet>,
}

/// What a period hands to the manifest, depending on the merge strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodOutput {
    /// Every selected track of the period muxed into one file.
    Muxed(PathBuf),
    /// At most one audio and one video track, kept apart.
    Split {
        audio: Option<PathBuf>,
        video: Option<PathBuf>,
    },
}

type Selection<'a> = (&'a AdaptationSet, &'a Representation);

impl Period {
    /// Select, download and merge the tracks of this period. The result is
    /// placed in `parent`.
    pub(crate) async fn download<F, P>(
        &self,
        context: &DownloadContext<F, P>,
        options: &DownloadOptions,
        parent: &ScopedDir,
    ) -> KasaneResult<PeriodOutput>
    where
        F: Fetcher,
        P: ProcessRunner,
    {
        let (audio, video) = self.select(options)?;
        tracing::info!(
            period = %self.id,
            audio = audio.len(),
            video = video.len(),
            "Downloading period"
        );

        let dir = parent.child(Scope::Period)?;
        let prefix = format!("period-{}", sanitize_file_component(&self.id));
        let mut audio_files = Vec::with_capacity(audio.len());
        for (set, representation) in audio {
            audio_files.push(set.download(representation, context, options, &dir).await?);
        }
        let mut video_files = Vec::with_capacity(video.len());
        for (set, representation) in video {
            video_files.push(set.download(representation, context, options, &dir).await?);
        }

        match options.merge_strategy {
            MergeStrategy::PerPeriod => {
                let mut inputs = audio_files;
                inputs.extend(video_files);

                let merged = if let [single] = inputs.as_slice() {
                    single.clone()
                } else {
                    let merged = dir.join("merged.mp4");
                    merge::mux(context, &inputs, &merged).await?;
                    merged
                };
                Ok(PeriodOutput::Muxed(
                    parent.adopt_with_prefix(&merged, &prefix).await?,
                ))
            }
            MergeStrategy::PerFormat => {
                let audio = match audio_files.first() {
                    Some(file) => Some(parent.adopt_with_prefix(file, &prefix).await?),
                    None => None,
                };
                let video = match video_files.first() {
                    Some(file) => Some(parent.adopt_with_prefix(file, &prefix).await?),
                    None => None,
                };
                Ok(PeriodOutput::Split { audio, video })
            }
        }
    }

    /// Choose the representations to download and check that the choice can
    /// be merged, before anything is fetched.
    fn select(
        &self,
        options: &DownloadOptions,
    ) -> KasaneResult<(Vec<Selection<'_>>, Vec<Selection<'_>>)> {
        let mut audio = Vec::new();
        let mut video = Vec::new();
        for set in &self.adaptation_sets {
            let Some(representation) = select_representation(set, options)? else {
                continue;
            };
            match set.kind {
                Some(TrackKind::Audio) => audio.push((set, representation)),
                Some(TrackKind::Video) => video.push((set, representation)),
                _ => {}
            }
        }

        if audio.is_empty() && video.is_empty() {
            return Err(KasaneError::NoRepresentation(format!("period {}", self.id)));
        }
        if options.merge_strategy == MergeStrategy::PerFormat && (audio.len() > 1 || video.len() > 1)
        {
            return Err(KasaneError::Configuration(format!(
                "per-format merging needs at most one audio and one video track per period, \
                 period {} selects {} audio and {} video tracks",
                self.id,
                audio.len(),
                video.len()
            )));
        }
        for (set, _) in audio.iter().chain(video.iter()) {
            set.ensure_keys(options)?;
        }

        Ok((audio, video))
    }
}
