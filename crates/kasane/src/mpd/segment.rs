use std::path::Path;

use url::Url;

use super::{template::Template, url::merge_baseurls};
use crate::{
    download::{reassemble, DownloadContext, ParallelDownloader, SegmentJob},
    error::{KasaneError, KasaneResult},
    fetch::Fetcher,
    options::DownloadOptions,
    process::ProcessRunner,
    util::path::{Scope, ScopedDir},
};

/// Upper bound on the segments one template may expand to.
pub const MAX_SEGMENTS: usize = 1 << 20;

/// One media segment on the template's timescale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub duration: u64,
}

/// An `S` element of a `SegmentTimeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub t: Option<u64>,
    pub d: u64,
    pub r: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SegmentTemplate {
    pub initialization: Option<String>,
    pub media: String,
    pub timescale: u64,
    pub start_number: Option<u64>,
    pub presentation_time_offset: u64,
    /// Ordered by ascending start time.
    pub segments: Vec<Segment>,
}

impl SegmentTemplate {
    /// `$Number$` of the first segment.
    pub fn first_number(&self) -> u64 {
        self.start_number.unwrap_or(1)
    }

    pub fn number_of(&self, position: usize) -> u64 {
        self.first_number() + position as u64
    }

    pub(crate) fn from_mpd(
        template: &dash_mpd::SegmentTemplate,
        period_duration_ms: Option<u64>,
    ) -> KasaneResult<Self> {
        let media = template.media.clone().ok_or_else(|| {
            KasaneError::Parse("SegmentTemplate without media attribute".to_string())
        })?;
        let timescale = template.timescale.unwrap_or(1).max(1);
        let start_number = template.startNumber;
        let presentation_time_offset = template.presentationTimeOffset.unwrap_or(0);
        let period_end = period_duration_ms
            .map(|ms| presentation_time_offset.saturating_add(ms_to_timescale(ms, timescale)));

        let segments = if let Some(timeline) = &template.SegmentTimeline {
            let entries: Vec<_> = timeline
                .segments
                .iter()
                .map(|s| TimelineEntry {
                    t: s.t,
                    d: s.d,
                    r: s.r,
                })
                .collect();
            resolve_timeline(&entries, start_number, period_end)?
        } else if let Some(duration) = template.duration {
            let duration_ms = period_duration_ms.ok_or_else(|| {
                KasaneError::Parse(
                    "SegmentTemplate@duration needs a known period duration".to_string(),
                )
            })?;
            resolve_fixed_duration(
                duration as f64,
                timescale,
                duration_ms,
                presentation_time_offset,
            )?
        } else {
            return Err(KasaneError::Parse(
                "SegmentTemplate has neither SegmentTimeline nor duration".to_string(),
            ));
        };

        Ok(Self {
            initialization: template.initialization.clone(),
            media,
            timescale,
            start_number,
            presentation_time_offset,
            segments,
        })
    }

    /// Fetch the initialization segment and every media segment, and write
    /// them in order to `output`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn download<F, P>(
        &self,
        context: &DownloadContext<F, P>,
        options: &DownloadOptions,
        base_url: &Url,
        representation_id: Option<&str>,
        bandwidth: Option<u64>,
        parent: &ScopedDir,
        output: &Path,
    ) -> KasaneResult<()>
    where
        F: Fetcher,
        P: ProcessRunner,
    {
        let mut template = Template::new();
        match representation_id {
            Some(id) => template.insert(Template::REPRESENTATION_ID, id.to_string()),
            None => {
                let needs_id = Template::references(&self.media, Template::REPRESENTATION_ID)
                    || self.initialization.as_deref().is_some_and(|init| {
                        Template::references(init, Template::REPRESENTATION_ID)
                    });
                if needs_id {
                    return Err(KasaneError::Parse(format!(
                        "template `{}` uses $RepresentationID$ but the representation has no id",
                        self.media
                    )));
                }
            }
        }
        if let Some(bandwidth) = bandwidth {
            template.insert(Template::BANDWIDTH, bandwidth.to_string());
        }

        let init = match &self.initialization {
            Some(initialization) => {
                let url = merge_baseurls(base_url, &template.resolve(initialization))?;
                tracing::debug!("Fetching initialization segment {url}");
                Some(context.fetch(&url, options).await?)
            }
            None => None,
        };

        let mut jobs = Vec::with_capacity(self.segments.len());
        for (position, segment) in self.segments.iter().enumerate() {
            let index = self.number_of(position);
            template.insert(Template::NUMBER, index.to_string());
            template.insert(Template::TIME, segment.start.to_string());
            let url = merge_baseurls(base_url, &template.resolve(&self.media))?;
            jobs.push(SegmentJob { index, url });
        }
        tracing::info!(
            representation = ?representation_id,
            segments = jobs.len(),
            "Downloading segments"
        );

        let batch = parent.child(Scope::SegmentBatch)?;
        let report = ParallelDownloader::new(context, options)
            .download(jobs, &batch)
            .await?;
        reassemble(init.as_deref(), &report, output).await
    }
}

fn ms_to_timescale(ms: u64, timescale: u64) -> u64 {
    u64::try_from(ms as u128 * timescale as u128 / 1000).unwrap_or(u64::MAX)
}

/// Fill the attributes missing from `own` with those of the template one
/// level up. Addressing (`duration` or `SegmentTimeline`) is inherited as a
/// whole.
pub(crate) fn inherit_template(
    own: &dash_mpd::SegmentTemplate,
    parent: &dash_mpd::SegmentTemplate,
) -> dash_mpd::SegmentTemplate {
    let mut merged = own.clone();
    merged.initialization = merged
        .initialization
        .or_else(|| parent.initialization.clone());
    merged.media = merged.media.or_else(|| parent.media.clone());
    merged.timescale = merged.timescale.or(parent.timescale);
    merged.startNumber = merged.startNumber.or(parent.startNumber);
    merged.presentationTimeOffset = merged
        .presentationTimeOffset
        .or(parent.presentationTimeOffset);
    if merged.duration.is_none() && merged.SegmentTimeline.is_none() {
        merged.duration = parent.duration;
        merged.SegmentTimeline = parent.SegmentTimeline.clone();
    }
    merged
}

fn too_many_segments() -> KasaneError {
    KasaneError::Parse(format!(
        "SegmentTemplate expands to more than {MAX_SEGMENTS} segments"
    ))
}

/// Expand a `SegmentTimeline` into a flat segment list.
///
/// The cursor starts at the first entry's `t`, else at `start_number`, else
/// at 0. An explicit `t` always wins over the cursor. A negative repeat count
/// runs until the next entry's `t` or `end`; when neither is known it is
/// treated as no repeat.
///
/// Zero durations and timelines longer than [`MAX_SEGMENTS`] are rejected.
pub fn resolve_timeline(
    entries: &[TimelineEntry],
    start_number: Option<u64>,
    end: Option<u64>,
) -> KasaneResult<Vec<Segment>> {
    let mut cursor = entries
        .first()
        .and_then(|entry| entry.t)
        .or(start_number)
        .unwrap_or(0);
    let mut segments = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if let Some(t) = entry.t {
            if t != cursor {
                tracing::warn!("Timeline mismatch: expected start {cursor}, got t={t}");
                cursor = t;
            }
        }
        if entry.d == 0 {
            return Err(KasaneError::Parse(format!(
                "SegmentTimeline entry at {cursor} has zero duration"
            )));
        }

        let repeat = match entry.r {
            Some(r) if r >= 0 => r as u64,
            Some(_) => {
                let until = entries.get(i + 1).and_then(|next| next.t).or(end);
                match until {
                    Some(until) if until > cursor => (until - cursor).div_ceil(entry.d) - 1,
                    _ => {
                        tracing::warn!(
                            "Negative repeat count at {cursor} without a known end, treating as 0"
                        );
                        0
                    }
                }
            }
            None => 0,
        };
        if repeat >= (MAX_SEGMENTS - segments.len()) as u64 {
            return Err(too_many_segments());
        }

        for _ in 0..=repeat {
            segments.push(Segment {
                start: cursor,
                duration: entry.d,
            });
            cursor = cursor.checked_add(entry.d).ok_or_else(|| {
                KasaneError::Parse("SegmentTimeline time overflows".to_string())
            })?;
        }
    }

    Ok(segments)
}

/// Enumerate the segments of a `SegmentTemplate@duration` template covering
/// `period_duration_ms`.
pub fn resolve_fixed_duration(
    duration: f64,
    timescale: u64,
    period_duration_ms: u64,
    presentation_time_offset: u64,
) -> KasaneResult<Vec<Segment>> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(KasaneError::Parse(format!(
            "invalid SegmentTemplate@duration {duration}"
        )));
    }

    let period_ticks = period_duration_ms as f64 * timescale as f64 / 1000.0;
    let count = (period_ticks / duration).ceil();
    if count > MAX_SEGMENTS as f64 {
        return Err(too_many_segments());
    }
    let count = count as u64;
    Ok((0..count)
        .map(|i| Segment {
            start: presentation_time_offset + (i as f64 * duration).round() as u64,
            duration: duration.round() as u64,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(t: Option<u64>, d: u64, r: Option<i64>) -> TimelineEntry {
        TimelineEntry { t, d, r }
    }

    fn starts(segments: &[Segment]) -> Vec<u64> {
        segments.iter().map(|s| s.start).collect()
    }

    #[test]
    fn test_timeline_length_and_starts() -> KasaneResult<()> {
        let entries = [
            entry(Some(0), 10, Some(2)),
            entry(None, 5, None),
            entry(None, 7, Some(1)),
        ];
        let segments = resolve_timeline(&entries, None, None)?;

        assert_eq!(segments.len(), 3 + 1 + 2);
        assert_eq!(starts(&segments), vec![0, 10, 20, 30, 35, 42]);
        assert!(segments.windows(2).all(|w| w[0].start <= w[1].start));
        Ok(())
    }

    #[test]
    fn test_timeline_cursor_defaults() -> KasaneResult<()> {
        let entries = [entry(None, 4, Some(1))];
        assert_eq!(
            starts(&resolve_timeline(&entries, Some(100), None)?),
            vec![100, 104]
        );
        assert_eq!(starts(&resolve_timeline(&entries, None, None)?), vec![0, 4]);
        Ok(())
    }

    #[test]
    fn test_timeline_explicit_time_is_trusted() -> KasaneResult<()> {
        let entries = [entry(Some(0), 10, Some(1)), entry(Some(25), 10, None)];
        assert_eq!(
            starts(&resolve_timeline(&entries, None, None)?),
            vec![0, 10, 25]
        );
        Ok(())
    }

    #[test]
    fn test_timeline_negative_repeat() -> KasaneResult<()> {
        let entries = [entry(Some(0), 10, Some(-1)), entry(Some(40), 5, None)];
        assert_eq!(
            starts(&resolve_timeline(&entries, None, None)?),
            vec![0, 10, 20, 30, 40]
        );

        let until_end = resolve_timeline(&[entry(Some(0), 10, Some(-1))], None, Some(35))?;
        assert_eq!(until_end.len(), 4);

        let unknown_end = resolve_timeline(&[entry(Some(0), 10, Some(-1))], None, None)?;
        assert_eq!(unknown_end.len(), 1);
        Ok(())
    }

    #[test]
    fn test_timeline_rejects_zero_duration() {
        let entries = [entry(Some(0), 10, None), entry(None, 0, Some(3))];
        assert!(matches!(
            resolve_timeline(&entries, None, None),
            Err(KasaneError::Parse(_))
        ));
    }

    #[test]
    fn test_timeline_repeat_is_bounded() -> KasaneResult<()> {
        let huge = [entry(Some(0), 1, Some(i64::MAX))];
        assert!(matches!(
            resolve_timeline(&huge, None, None),
            Err(KasaneError::Parse(_))
        ));

        // the cap counts segments across entries
        let half = (MAX_SEGMENTS / 2) as i64;
        let split = [entry(Some(0), 1, Some(half)), entry(None, 1, Some(half))];
        assert!(resolve_timeline(&split, None, None).is_err());

        let fits = [entry(Some(0), 1, Some(half - 1)), entry(None, 1, Some(half - 1))];
        assert_eq!(resolve_timeline(&fits, None, None)?.len(), MAX_SEGMENTS);

        let overflow = [entry(Some(u64::MAX - 5), 10, Some(1))];
        assert!(resolve_timeline(&overflow, None, None).is_err());
        Ok(())
    }

    #[test]
    fn test_fixed_duration() -> KasaneResult<()> {
        // 10.5 seconds at 1000 ticks/s in 4 second segments
        let segments = resolve_fixed_duration(4000.0, 1000, 10_500, 0)?;
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2], Segment { start: 8000, duration: 4000 });

        assert!(resolve_fixed_duration(0.0, 1000, 10_500, 0).is_err());
        // a day of one-tick segments
        assert!(resolve_fixed_duration(1.0, 1000, 86_400_000, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_template_inheritance() {
        let parent = dash_mpd::SegmentTemplate {
            initialization: Some("init.mp4".to_string()),
            media: Some("$Number$.m4s".to_string()),
            timescale: Some(1000),
            duration: Some(2000.0),
            ..Default::default()
        };
        let own = dash_mpd::SegmentTemplate {
            media: Some("$RepresentationID$/$Number$.m4s".to_string()),
            startNumber: Some(0),
            ..Default::default()
        };

        let merged = inherit_template(&own, &parent);
        assert_eq!(merged.initialization.as_deref(), Some("init.mp4"));
        assert_eq!(
            merged.media.as_deref(),
            Some("$RepresentationID$/$Number$.m4s")
        );
        assert_eq!(merged.timescale, Some(1000));
        assert_eq!(merged.startNumber, Some(0));
        assert_eq!(merged.duration, Some(2000.0));
    }

    #[test]
    fn test_numbering() {
        let template = SegmentTemplate {
            initialization: None,
            media: "$Number$.m4s".to_string(),
            timescale: 1,
            start_number: None,
            presentation_time_offset: 0,
            segments: Vec::new(),
        };
        assert_eq!(template.number_of(0), 1);

        let template = SegmentTemplate {
            start_number: Some(0),
            ..template
        };
        assert_eq!(template.number_of(3), 3);
    }
}
