use std::{
    ffi::{OsStr, OsString},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::error::{KasaneError, KasaneResult};

/// The nesting levels of a download's temporary tree. Each level gets its own
/// uniquely named directory below its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Manifest,
    Period,
    AdaptationSet,
    Representation,
    SegmentBatch,
    Concat,
}

impl Scope {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Manifest => "kasane-",
            Self::Period => "period-",
            Self::AdaptationSet => "adaptation-set-",
            Self::Representation => "representation-",
            Self::SegmentBatch => "segments-",
            Self::Concat => "concat-",
        }
    }
}

/// A temporary directory that is removed with everything inside it when
/// dropped, no matter whether the owning stage succeeded, failed or was
/// cancelled.
#[derive(Debug)]
pub struct ScopedDir {
    dir: TempDir,
}

impl ScopedDir {
    /// Create the top-level directory of a download below `temp_root`, or
    /// below the system temp dir.
    pub fn root(temp_root: Option<&Path>) -> KasaneResult<Self> {
        let root = temp_root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&root)?;
        Self::create(Scope::Manifest, &root)
    }

    pub fn child(&self, scope: Scope) -> KasaneResult<Self> {
        Self::create(scope, self.path())
    }

    fn create(scope: Scope, parent: &Path) -> KasaneResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(scope.prefix())
            .tempdir_in(parent)?;
        tracing::trace!("Created temporary directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.dir.path().join(path)
    }

    /// Move `file` into this directory, keeping its file name. Used to hand a
    /// result to the parent stage before the child directory goes away.
    pub async fn adopt(&self, file: &Path) -> KasaneResult<PathBuf> {
        let file_name = file
            .file_name()
            .ok_or_else(|| KasaneError::OutputPath(file.to_path_buf()))?;
        let target = self.join(file_name);
        move_file(file, &target).await?;
        Ok(target)
    }

    /// Like [`ScopedDir::adopt`], but prefixes the file name so that results of
    /// sibling stages can not collide.
    pub async fn adopt_with_prefix(&self, file: &Path, prefix: &str) -> KasaneResult<PathBuf> {
        let file_name = file
            .file_name()
            .ok_or_else(|| KasaneError::OutputPath(file.to_path_buf()))?;
        let mut target = self.join(file_name);
        target.add_prefix(prefix);
        move_file(file, &target).await?;
        Ok(target)
    }
}

/// Rename `from` to `to`, replacing `to`. Falls back to copy and remove when
/// the two paths live on different file systems.
pub async fn move_file(from: &Path, to: &Path) -> KasaneResult<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let rename_error = match tokio::fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(e.into()),
        Err(e) => e,
    };

    tracing::debug!(
        "Can not rename {} ({rename_error}), copying instead",
        from.display()
    );
    if tokio::fs::copy(from, to).await.is_err() {
        return Err(rename_error.into());
    }
    tokio::fs::remove_file(from).await?;
    Ok(())
}

/// Replace every character that is unsafe in a file name.
pub fn sanitize_file_component(s: &str) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('.');
    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized.to_string()
    }
}

pub trait KasanePathExt {
    /// Add a prefix to the file name, e.g. `video.mp4` -> `decrypted-video.mp4`.
    fn add_prefix<T: AsRef<OsStr>>(&mut self, prefix: T);
}

impl KasanePathExt for PathBuf {
    fn add_prefix<T: AsRef<OsStr>>(&mut self, prefix: T) {
        let mut filename = OsString::new();

        // {prefix}-{file_name}
        filename.push(prefix);
        filename.push("-");
        if let Some(name) = self.file_name() {
            filename.push(name);
        }

        self.set_file_name(filename);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_filename_prefix() {
        let mut path = PathBuf::from("/tmp/video-1.mp4");
        path.add_prefix("decrypted");
        assert_eq!(path, PathBuf::from("/tmp/decrypted-video-1.mp4"));
    }

    #[test]
    fn test_sanitize_file_component() {
        assert_eq!(sanitize_file_component("video=1080p/avc1"), "video-1080p-avc1");
        assert_eq!(sanitize_file_component("..."), "unnamed");
        assert_eq!(sanitize_file_component("a_b.c"), "a_b.c");
    }

    #[test]
    fn test_scoped_dirs_are_nested_and_released() -> KasaneResult<()> {
        let root = tempfile::tempdir()?;
        let manifest = ScopedDir::root(Some(root.path()))?;
        let period = manifest.child(Scope::Period)?;
        let other = manifest.child(Scope::Period)?;

        assert!(period.path().starts_with(manifest.path()));
        assert_ne!(period.path(), other.path());
        assert!(period
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("period-"));

        let period_path = period.path().to_path_buf();
        std::fs::write(period.join("data"), b"data")?;
        drop(period);
        assert!(!period_path.exists());

        let manifest_path = manifest.path().to_path_buf();
        drop(other);
        drop(manifest);
        assert!(!manifest_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_adopt_moves_into_parent() -> KasaneResult<()> {
        let root = tempfile::tempdir()?;
        let parent = ScopedDir::root(Some(root.path()))?;
        let child = parent.child(Scope::Representation)?;

        let file = child.join("output.mp4");
        tokio::fs::write(&file, b"media").await?;
        let adopted = parent.adopt(&file).await?;
        drop(child);

        assert_eq!(adopted, parent.join("output.mp4"));
        assert_eq!(tokio::fs::read(&adopted).await?, b"media");

        let sibling = parent.child(Scope::AdaptationSet)?;
        let file = sibling.join("output.mp4");
        tokio::fs::write(&file, b"other").await?;
        let prefixed = parent.adopt_with_prefix(&file, "2").await?;
        assert_eq!(prefixed, parent.join("2-output.mp4"));
        assert_eq!(tokio::fs::read(&adopted).await?, b"media");
        Ok(())
    }
}
