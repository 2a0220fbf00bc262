use crate::{
    error::{KasaneError, KasaneResult},
    mpd::{AdaptationSet, Representation, TrackKind},
    options::{DownloadOptions, ResolutionMatcher},
};

/// Pick the representation of `set` to download.
///
/// `Ok(None)` means the set is skipped: its language is filtered out, no
/// video representation matches the resolution, or the track type is not
/// downloaded at all. A set without any representation is an error.
pub fn select_representation<'a>(
    set: &'a AdaptationSet,
    options: &DownloadOptions,
) -> KasaneResult<Option<&'a Representation>> {
    if set.representations.is_empty() {
        return Err(KasaneError::NoRepresentation(format!(
            "adaptation set {}",
            set.id
        )));
    }

    let selected = match set.kind {
        Some(TrackKind::Audio) => {
            if !options.audio_language.accepts(set.lang.as_deref()) {
                tracing::debug!("Skipping {:?} audio track", set.lang);
                return Ok(None);
            }
            first_max_by(&set.representations, |r| r.bandwidth)
        }
        Some(TrackKind::Video) => match &options.resolution {
            ResolutionMatcher::Best => first_max_by(&set.representations, |r| r.width),
            matcher @ ResolutionMatcher::Literal(_) => set.representations.iter().find(|r| {
                matches!((r.width, r.height), (Some(w), Some(h)) if matcher.matches(w, h))
            }),
        },
        Some(TrackKind::Subtitle) => {
            if options.subtitle_language.accepts(set.lang.as_deref()) {
                tracing::debug!("Subtitle track {} is not downloaded", set.id);
            } else {
                tracing::debug!("Skipping {:?} subtitle track", set.lang);
            }
            None
        }
        None => {
            tracing::debug!("Skipping adaptation set {} of type {:?}", set.id, set.mime_type);
            None
        }
    };

    if let Some(representation) = selected {
        tracing::debug!(
            "Selected representation: {:?} | {:?} | {:?} | {:?}bps",
            set.mime_type,
            representation.codecs,
            representation.resolution(),
            representation.bandwidth
        );
    }
    Ok(selected)
}

/// The maximum by `key`, keeping the first one seen on ties.
fn first_max_by<K, F>(representations: &[Representation], key: F) -> Option<&Representation>
where
    K: Ord,
    F: Fn(&Representation) -> K,
{
    representations
        .iter()
        .reduce(|best, candidate| if key(candidate) > key(best) { candidate } else { best })
}
