//! Combining downloaded tracks with external tools.
//!
//! All tools stream-copy, nothing is re-encoded, and every command overwrites
//! its output so that running it again is safe.

use std::path::{Path, PathBuf};

use crate::{
    download::DownloadContext,
    error::{KasaneError, KasaneResult},
    fetch::Fetcher,
    process::{ExternalCommand, ProcessRunner, Tool},
    util::path::{Scope, ScopedDir},
};

/// Concatenate `inputs` in order with the ffmpeg concat demuxer.
pub async fn concat<F, P>(
    context: &DownloadContext<F, P>,
    inputs: &[PathBuf],
    parent: &ScopedDir,
    output: &Path,
) -> KasaneResult<()>
where
    F: Fetcher,
    P: ProcessRunner,
{
    if inputs.is_empty() {
        return Err(KasaneError::NoPeriods);
    }

    tracing::debug!("Concatenating {} files with ffmpeg...", inputs.len());

    let dir = parent.child(Scope::Concat)?;
    let list = dir.join("concat.txt");
    tokio::fs::write(&list, concat_list(inputs)).await?;

    let mut command = ExternalCommand::new(Tool::Ffmpeg, output)
        .args(["-f", "concat", "-safe", "0", "-i"])
        .arg(&list);
    for input in inputs {
        command = command.implicit_input(input);
    }
    let command = command
        .args(["-c", "copy", "-y", "-loglevel", "warning"])
        .output_arg();

    context.run(command).await
}

/// Mux every stream of `inputs` into one container.
pub async fn mux<F, P>(
    context: &DownloadContext<F, P>,
    inputs: &[PathBuf],
    output: &Path,
) -> KasaneResult<()>
where
    F: Fetcher,
    P: ProcessRunner,
{
    tracing::debug!("Merging {} tracks with ffmpeg...", inputs.len());

    let mut command = ExternalCommand::new(Tool::Ffmpeg, output);
    for input in inputs {
        command = command.arg("-i").input(input);
    }
    for i in 0..inputs.len() {
        command = command.arg("-map").arg(i.to_string());
    }
    let command = command
        .args(["-c", "copy", "-y", "-loglevel", "warning"])
        .output_arg();

    context.run(command).await
}

/// Remux `input` into Matroska with mkvmerge.
pub async fn remux_mkv<F, P>(
    context: &DownloadContext<F, P>,
    input: &Path,
    output: &Path,
) -> KasaneResult<()>
where
    F: Fetcher,
    P: ProcessRunner,
{
    tracing::debug!("Converting {} to mkv...", input.display());

    let command = ExternalCommand::new(Tool::MkvMerge, output)
        .arg("-q")
        .arg("-o")
        .output_arg()
        .input(input);

    context.run(command).await
}

/// Contents of an ffmpeg concat demuxer list file.
fn concat_list(inputs: &[PathBuf]) -> String {
    let mut list = String::new();
    for input in inputs {
        let escaped = input.to_string_lossy().replace('\'', r"'\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_list_escaping() {
        let list = concat_list(&[
            PathBuf::from("/tmp/period-a/video.mp4"),
            PathBuf::from("/tmp/it's.mp4"),
        ]);
        assert_eq!(
            list,
            "file '/tmp/period-a/video.mp4'\nfile '/tmp/it'\\''s.mp4'\n"
        );
    }
}
