//! # Static MPEG-DASH manifests
//!
//! A [`Manifest`] is parsed once with `dash-mpd` and converted into a small
//! owned tree: [`Period`] → [`AdaptationSet`] → [`Representation`] →
//! [`SegmentTemplate`]. Every node already carries its fully resolved base
//! URL and its expanded segment list, so downloading never goes back to the
//! XML.
//!
//! Downloading walks the tree sequentially. Each level works inside its own
//! [`ScopedDir`](crate::util::path::ScopedDir) and hands its result up to the
//! parent before the directory is removed.

mod adaptation;
mod period;
mod representation;
mod segment;
pub mod template;
mod url;

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use ::url::Url;
use dash_mpd::{BaseURL, MPD};

pub use adaptation::{AdaptationSet, TrackKind};
pub use period::{Period, PeriodOutput};
pub use representation::Representation;
pub use segment::{resolve_fixed_duration, resolve_timeline, Segment, SegmentTemplate, TimelineEntry};

use self::{
    segment::inherit_template,
    url::{is_absolute_url, merge_baseurls, resolve_base},
};
use crate::{
    download::DownloadContext,
    error::{KasaneError, KasaneResult},
    fetch::Fetcher,
    merge,
    options::{DownloadOptions, MergeStrategy},
    process::ProcessRunner,
    util::path::{move_file, ScopedDir},
};

#[derive(Debug, Clone)]
pub struct Manifest {
    /// Always absolute.
    pub base_url: Url,
    pub duration_ms: Option<u64>,
    /// In document order.
    pub periods: Vec<Period>,
}

impl Manifest {
    /// Fetch and parse the manifest at `url`. The fragment is dropped before
    /// the request; the query is kept for segment requests.
    pub async fn load<F>(fetcher: &F, url: &Url) -> KasaneResult<Self>
    where
        F: Fetcher,
    {
        let mut url = url.clone();
        url.set_fragment(None);

        tracing::info!("Fetching manifest {url}");
        let text = fetcher.fetch_manifest(&url).await?;
        Self::parse(&text, Some(&url))
    }

    /// Parse a manifest document. `location` is the URL the document was
    /// fetched from; relative `BaseURL`s are resolved against it.
    pub fn parse(text: &str, location: Option<&Url>) -> KasaneResult<Self> {
        let mpd = dash_mpd::parse(text).map_err(|e| KasaneError::Parse(e.to_string()))?;
        Self::from_mpd(mpd, location)
    }

    fn from_mpd(mpd: MPD, location: Option<&Url>) -> KasaneResult<Self> {
        if mpd.mpdtype.as_deref() == Some("dynamic") {
            return Err(KasaneError::Parse(
                "dynamic (live) manifests are not supported".to_string(),
            ));
        }
        if mpd.periods.is_empty() {
            return Err(KasaneError::Parse("no Period found".to_string()));
        }

        let declared = first_base_url(&mpd.base_url);
        let base_url = match (declared, location) {
            (Some(declared), Some(location)) => {
                tracing::debug!("Resolving BaseURL {declared} against {location}");
                merge_baseurls(location, declared)?
            }
            (Some(declared), None) if is_absolute_url(declared) => Url::parse(declared)?,
            (None, Some(location)) => {
                tracing::debug!("No BaseURL found, using manifest URL as base");
                location.clone()
            }
            _ => {
                return Err(KasaneError::Parse(
                    "can not resolve an absolute base URL without the manifest location"
                        .to_string(),
                ))
            }
        };

        let duration_ms = mpd.mediaPresentationDuration.map(to_millis).transpose()?;
        let starts = mpd
            .periods
            .iter()
            .map(|period| period.start.map(to_millis).transpose())
            .collect::<KasaneResult<Vec<_>>>()?;

        let mut ids = HashSet::new();
        let mut periods = Vec::with_capacity(mpd.periods.len());
        for (index, period) in mpd.periods.iter().enumerate() {
            let id = period.id.clone().unwrap_or_else(|| index.to_string());
            if !ids.insert(id.clone()) {
                return Err(KasaneError::Parse(format!("duplicate Period id {id}")));
            }

            let start_ms = starts[index];
            let period_duration_ms = match period.duration {
                Some(duration) => Some(to_millis(duration)?),
                None => {
                    let end = match starts.get(index + 1) {
                        Some(next_start) => *next_start,
                        None => duration_ms,
                    };
                    end.and_then(|end| end.checked_sub(start_ms.unwrap_or(0)))
                }
            };

            let base_url = resolve_base(&base_url, first_base_url(&period.BaseURL))?;

            let mut adaptation_sets = Vec::with_capacity(period.adaptations.len());
            for (set_index, adaptation) in period.adaptations.iter().enumerate() {
                adaptation_sets.push(convert_adaptation_set(
                    set_index,
                    adaptation,
                    period.SegmentTemplate.as_ref(),
                    &base_url,
                    period_duration_ms,
                )?);
            }

            tracing::debug!(
                period = %id,
                start_ms = ?start_ms,
                duration_ms = ?period_duration_ms,
                adaptation_sets = adaptation_sets.len(),
                "Parsed period"
            );
            periods.push(Period {
                id,
                start_ms,
                duration_ms: period_duration_ms,
                base_url,
                adaptation_sets,
            });
        }

        Ok(Self {
            base_url,
            duration_ms,
            periods,
        })
    }

    /// Download every period that is not ignored, merge them according to
    /// the merge strategy and move the result to `output`.
    ///
    /// Returns the final path, which has the `.mkv` extension when the file is
    /// converted to Matroska.
    pub async fn download<F, P>(
        &self,
        context: &DownloadContext<F, P>,
        options: &DownloadOptions,
        output: &Path,
    ) -> KasaneResult<PathBuf>
    where
        F: Fetcher,
        P: ProcessRunner,
    {
        let periods: Vec<_> = self
            .periods
            .iter()
            .filter(|period| {
                let ignored = options.is_period_ignored(&period.id);
                if ignored {
                    tracing::info!("Ignoring period {}", period.id);
                }
                !ignored
            })
            .collect();
        if periods.is_empty() {
            return Err(KasaneError::NoPeriods);
        }

        let root = ScopedDir::root(options.temp_dir.as_deref())?;
        tracing::debug!("Working in {}", root.path().display());

        let mut outputs = Vec::with_capacity(periods.len());
        for period in periods {
            context.ensure_active()?;
            outputs.push(period.download(context, options, &root).await?);
        }

        let combined = match options.merge_strategy {
            MergeStrategy::PerPeriod => {
                let mut files = Vec::with_capacity(outputs.len());
                for output in outputs {
                    let PeriodOutput::Muxed(file) = output else {
                        return Err(KasaneError::Configuration(
                            "period output was not muxed".to_string(),
                        ));
                    };
                    files.push(file);
                }
                concat_or_single(context, files, &root, "combined.mp4").await?
            }
            MergeStrategy::PerFormat => {
                let mut audio_files = Vec::new();
                let mut video_files = Vec::new();
                for output in outputs {
                    let PeriodOutput::Split { audio, video } = output else {
                        return Err(KasaneError::Configuration(
                            "period output was muxed".to_string(),
                        ));
                    };
                    audio_files.extend(audio);
                    video_files.extend(video);
                }

                let audio = if audio_files.is_empty() {
                    None
                } else {
                    Some(concat_or_single(context, audio_files, &root, "audio.m4a").await?)
                };
                let video = if video_files.is_empty() {
                    None
                } else {
                    Some(concat_or_single(context, video_files, &root, "video.mp4").await?)
                };

                match (audio, video) {
                    (Some(audio), Some(video)) => {
                        let muxed = root.join("combined.mp4");
                        merge::mux(context, &[audio, video], &muxed).await?;
                        muxed
                    }
                    (Some(single), None) | (None, Some(single)) => single,
                    (None, None) => {
                        return Err(KasaneError::NoRepresentation("manifest".to_string()))
                    }
                }
            }
        };

        let (result, target) = if options.convert_to_mkv {
            let mkv = root.join("combined.mkv");
            merge::remux_mkv(context, &combined, &mkv).await?;
            (mkv, output.with_extension("mkv"))
        } else {
            (combined, output.to_path_buf())
        };

        move_file(&result, &target).await?;
        tracing::info!("Saved to {}", target.display());
        Ok(target)
    }
}

async fn concat_or_single<F, P>(
    context: &DownloadContext<F, P>,
    mut files: Vec<PathBuf>,
    root: &ScopedDir,
    name: &str,
) -> KasaneResult<PathBuf>
where
    F: Fetcher,
    P: ProcessRunner,
{
    if files.len() == 1 {
        return Ok(files.remove(0));
    }
    let output = root.join(name);
    merge::concat(context, &files, root, &output).await?;
    Ok(output)
}

fn to_millis(duration: Duration) -> KasaneResult<u64> {
    u64::try_from(duration.as_millis())
        .map_err(|_| KasaneError::Parse(format!("duration {duration:?} is too large")))
}

fn first_base_url(base_urls: &[BaseURL]) -> Option<&str> {
    base_urls
        .iter()
        .map(|base| base.base.trim())
        .find(|base| !base.is_empty())
}

fn inherit(
    own: Option<&dash_mpd::SegmentTemplate>,
    parent: Option<&dash_mpd::SegmentTemplate>,
) -> Option<dash_mpd::SegmentTemplate> {
    match (own, parent) {
        (Some(own), Some(parent)) => Some(inherit_template(own, parent)),
        (own, parent) => own.or(parent).cloned(),
    }
}

fn convert_adaptation_set(
    index: usize,
    adaptation: &dash_mpd::AdaptationSet,
    period_template: Option<&dash_mpd::SegmentTemplate>,
    period_base: &Url,
    period_duration_ms: Option<u64>,
) -> KasaneResult<AdaptationSet> {
    let id = adaptation
        .id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| index.to_string());
    let base_url = resolve_base(period_base, first_base_url(&adaptation.BaseURL))?;

    let first = adaptation.representations.first();
    let mime_type = adaptation
        .mimeType
        .clone()
        .or_else(|| first.and_then(|r| r.mimeType.clone()));
    let kind = mime_type
        .as_deref()
        .and_then(TrackKind::from_mime_type)
        .or_else(|| {
            adaptation
                .contentType
                .as_deref()
                .or_else(|| first.and_then(|r| r.contentType.as_deref()))
                .and_then(TrackKind::from_content_type)
        });
    let lang = adaptation
        .lang
        .clone()
        .or_else(|| first.and_then(|r| r.lang.clone()));
    let set_template = inherit(adaptation.SegmentTemplate.as_ref(), period_template);

    let mut representations = Vec::with_capacity(adaptation.representations.len());
    for representation in &adaptation.representations {
        let base_url = resolve_base(&base_url, first_base_url(&representation.BaseURL))?;
        let segment_template = inherit(
            representation.SegmentTemplate.as_ref(),
            set_template.as_ref(),
        )
        .map(|template| SegmentTemplate::from_mpd(&template, period_duration_ms))
        .transpose()?;
        if segment_template.is_none() {
            tracing::warn!(
                "Representation {:?} has no SegmentTemplate and can not be downloaded",
                representation.id
            );
        }

        let audio_channels = representation
            .AudioChannelConfiguration
            .iter()
            .chain(adaptation.AudioChannelConfiguration.iter())
            .find_map(|config| config.value.clone());

        representations.push(Representation {
            id: representation.id.clone(),
            width: representation.width,
            height: representation.height,
            bandwidth: representation.bandwidth,
            codecs: representation
                .codecs
                .clone()
                .or_else(|| adaptation.codecs.clone()),
            audio_sampling_rate: representation
                .audioSamplingRate
                .as_ref()
                .or(adaptation.audioSamplingRate.as_ref())
                .map(ToString::to_string),
            audio_channels,
            content_protection: !representation.ContentProtection.is_empty(),
            base_url,
            segment_template,
        });
    }

    Ok(AdaptationSet {
        id,
        mime_type,
        kind,
        lang,
        content_protection: !adaptation.ContentProtection.is_empty(),
        representations,
    })
}
