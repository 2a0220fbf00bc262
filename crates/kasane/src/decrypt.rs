use std::path::{Path, PathBuf};

use crate::{
    download::DownloadContext,
    error::{KasaneError, KasaneResult},
    fetch::Fetcher,
    options::DecryptKeys,
    process::{ExternalCommand, ProcessRunner, Tool},
    util::path::KasanePathExt,
};

/// Decrypt a CENC protected file with mp4decrypt. The decrypted file is
/// written next to `input` with a `decrypted-` prefix.
pub async fn decrypt<F, P>(
    context: &DownloadContext<F, P>,
    keys: &DecryptKeys,
    input: &Path,
) -> KasaneResult<PathBuf>
where
    F: Fetcher,
    P: ProcessRunner,
{
    if keys.is_empty() {
        return Err(KasaneError::MissingKeys(input.display().to_string()));
    }

    let mut output = input.to_path_buf();
    output.add_prefix("decrypted");

    let mut command = ExternalCommand::new(Tool::Mp4Decrypt, &output);
    for (kid, key) in keys.iter() {
        command = command.arg("--key").arg(format!("{kid}:{key}"));
    }
    let command = command.input(input).output_arg();

    tracing::info!("Decrypting {} with {} keys", input.display(), keys.len());
    context.run(command).await?;
    Ok(output)
}

/// Rewrite a fragmented MP4 into a flat one with ffmpeg.
pub async fn defragment<F, P>(context: &DownloadContext<F, P>, input: &Path) -> KasaneResult<PathBuf>
where
    F: Fetcher,
    P: ProcessRunner,
{
    let mut output = input.to_path_buf();
    output.add_prefix("defrag");

    let command = ExternalCommand::new(Tool::Ffmpeg, &output)
        .arg("-i")
        .input(input)
        .args(["-c", "copy", "-movflags", "+faststart", "-y", "-loglevel", "warning"])
        .output_arg();

    tracing::debug!("Defragmenting {}", input.display());
    context.run(command).await?;
    Ok(output)
}
