use url::Url;

use crate::error::KasaneResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

pub(crate) fn merge_baseurls(current: &Url, new: &str) -> KasaneResult<Url> {
    let new = new.trim();
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        // We are careful to merge the query portion of the current URL (which is either the
        // original manifest URL, or the URL that it redirected to, or the value of a BaseURL
        // element in the manifest) with the new URL. But if the new URL already has a query string,
        // it takes precedence.
        //
        // Examples
        //
        // merge_baseurls(https://example.com/manifest.mpd?auth=secret, /video42.mp4) =>
        //   https://example.com/video42.mp4?auth=secret
        //
        // merge_baseurls(https://example.com/manifest.mpd?auth=old, /video42.mp4?auth=new) =>
        //   https://example.com/video42.mp4?auth=new
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// Resolve an optional chain of nested `BaseURL` values against `base`.
pub(crate) fn resolve_base(base: &Url, nested: Option<&str>) -> KasaneResult<Url> {
    match nested {
        Some(nested) => merge_baseurls(base, nested),
        None => Ok(base.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_baseurls() -> KasaneResult<()> {
        let manifest = Url::parse("https://example.com/path/manifest.mpd?auth=secret")?;

        assert_eq!(
            merge_baseurls(&manifest, "video/")?.as_str(),
            "https://example.com/path/video/?auth=secret"
        );
        assert_eq!(
            merge_baseurls(&manifest, "/video42.mp4?auth=new")?.as_str(),
            "https://example.com/video42.mp4?auth=new"
        );
        assert_eq!(
            merge_baseurls(&manifest, "https://cdn.example.net/a/")?.as_str(),
            "https://cdn.example.net/a/"
        );
        Ok(())
    }

    #[test]
    fn test_resolve_base_chain() -> KasaneResult<()> {
        let base = Url::parse("https://example.com/dash/")?;
        let period = resolve_base(&base, Some("p1/"))?;
        let representation = resolve_base(&period, Some("video/"))?;
        assert_eq!(representation.as_str(), "https://example.com/dash/p1/video/");
        assert_eq!(resolve_base(&base, None)?, base);
        Ok(())
    }
}
