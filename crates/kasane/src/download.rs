//! Segment downloading.
//!
//! ```text
//!                  ┌──────────────┐  segment 0   ┌────────────┐
//!                  │              ├──────────────►  worker 1  ├──► segment_000000.m4s
//!  SegmentTemplate │   Parallel   │  segment 1   ├────────────┤
//!  ───────────────►│  Downloader  ├──────────────►  worker 2  ├──► segment_000001.m4s
//!      jobs        │  [Semaphore] │     ...      ├────────────┤
//!                  │              ├──────────────►  worker N  ├──► ...
//!                  └──────────────┘              └────────────┘
//!                                                      │ all finished
//!                                                      ▼
//!                               init + segment files by ascending index
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    fs::File,
    io::AsyncWriteExt,
    sync::Semaphore,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::{KasaneError, KasaneResult},
    fetch::Fetcher,
    mpd::Manifest,
    options::{DownloadOptions, SegmentFailurePolicy},
    process::{ExternalCommand, ProcessRunner},
    util::path::ScopedDir,
};

/// The collaborators of one download: where bytes come from, how external
/// tools are run, and the token which aborts everything.
pub struct DownloadContext<F, P> {
    fetcher: Arc<F>,
    runner: P,
    cancel: CancellationToken,
}

impl<F, P> DownloadContext<F, P>
where
    F: Fetcher,
    P: ProcessRunner,
{
    pub fn new(fetcher: F, runner: P) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            runner,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one cancelled by a Ctrl-C handler.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn runner(&self) -> &P {
        &self.runner
    }

    /// Fetch and parse the manifest at `url`, then download it to `output`.
    pub async fn download_url(
        &self,
        url: &Url,
        options: &DownloadOptions,
        output: &Path,
    ) -> KasaneResult<PathBuf> {
        let manifest = tokio::select! {
            _ = self.cancel.cancelled() => return Err(KasaneError::Cancelled),
            manifest = Manifest::load(self.fetcher.as_ref(), url) => manifest?,
        };
        manifest.download(self, options, output).await
    }

    pub(crate) fn ensure_active(&self) -> KasaneResult<()> {
        if self.cancel.is_cancelled() {
            return Err(KasaneError::Cancelled);
        }
        Ok(())
    }

    /// Fetch one resource outside of a segment batch, with the same retry and
    /// timeout rules as segments.
    pub(crate) async fn fetch(&self, url: &Url, options: &DownloadOptions) -> KasaneResult<Bytes> {
        fetch_with_retry(
            self.fetcher.as_ref(),
            url,
            options.segment_retries,
            options.fetch_timeout,
            &self.cancel,
        )
        .await
    }

    pub(crate) async fn run(&self, command: ExternalCommand) -> KasaneResult<()> {
        self.ensure_active()?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(KasaneError::Cancelled),
            result = self.runner.run(&command) => result,
        }
    }
}

async fn fetch_with_retry<F>(
    fetcher: &F,
    url: &Url,
    retries: u32,
    timeout: Duration,
    cancel: &CancellationToken,
) -> KasaneResult<Bytes>
where
    F: Fetcher,
{
    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(KasaneError::Cancelled),
            result = tokio::time::timeout(timeout, fetcher.fetch(url)) => {
                result.unwrap_or(Err(KasaneError::Timeout(timeout)))
            }
        };

        match result {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < retries && e.is_retryable() => {
                attempt += 1;
                tracing::warn!("Fetching {url} failed, retry later ({attempt}/{retries}). {e}");
            }
            Err(e) => return Err(e),
        }
    }
}

/// One media segment to fetch. `index` is the value substituted for
/// `$Number$` and decides the position in the reassembled file.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub index: u64,
    pub url: Url,
}

enum SegmentOutcome {
    Saved { index: u64, path: PathBuf },
    Failed { index: u64, url: Url, error: KasaneError },
}

async fn fetch_segment<F>(
    fetcher: &F,
    job: SegmentJob,
    retries: u32,
    timeout: Duration,
    cancel: &CancellationToken,
    path: PathBuf,
) -> KasaneResult<SegmentOutcome>
where
    F: Fetcher,
{
    match fetch_with_retry(fetcher, &job.url, retries, timeout, cancel).await {
        Ok(bytes) => {
            tokio::fs::write(&path, &bytes).await?;
            Ok(SegmentOutcome::Saved {
                index: job.index,
                path,
            })
        }
        Err(KasaneError::Cancelled) => Err(KasaneError::Cancelled),
        Err(error) => Ok(SegmentOutcome::Failed {
            index: job.index,
            url: job.url,
            error,
        }),
    }
}

/// Segment files of a finished batch, keyed by index.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: BTreeMap<u64, PathBuf>,
    pub failed: Vec<u64>,
}

pub struct ParallelDownloader<'a, F, P> {
    context: &'a DownloadContext<F, P>,
    options: &'a DownloadOptions,
}

impl<'a, F, P> ParallelDownloader<'a, F, P>
where
    F: Fetcher,
    P: ProcessRunner,
{
    pub fn new(context: &'a DownloadContext<F, P>, options: &'a DownloadOptions) -> Self {
        Self { context, options }
    }

    /// Fetch every job into `dir` and wait for the whole batch.
    ///
    /// With [`SegmentFailurePolicy::Abort`] the first segment that exhausts its
    /// retries stops the batch and is returned as
    /// [`KasaneError::SegmentFetch`]. With [`SegmentFailurePolicy::BestEffort`]
    /// failed segments are listed in the report instead.
    pub async fn download(&self, jobs: Vec<SegmentJob>, dir: &ScopedDir) -> KasaneResult<BatchReport> {
        self.context.ensure_active()?;

        let concurrency = self.options.concurrency.get();
        tracing::debug!("Using {concurrency} workers to download {} segments", jobs.len());

        let total = jobs.len();
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        for job in jobs {
            let permits = permits.clone();
            let fetcher = self.context.fetcher.clone();
            let cancel = self.context.cancel.clone();
            let retries = self.options.segment_retries;
            let timeout = self.options.fetch_timeout;
            let path = dir.join(format!("segment_{:06}.m4s", job.index));

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Err(KasaneError::Cancelled);
                };
                fetch_segment(fetcher.as_ref(), job, retries, timeout, &cancel, path).await
            });
        }

        let mut report = BatchReport::default();
        while let Some(outcome) = tasks.join_next().await {
            match outcome?? {
                SegmentOutcome::Saved { index, path } => {
                    report.files.insert(index, path);
                    let finished = report.files.len() + report.failed.len();
                    tracing::debug!("Segment {index} finished. ({finished} / {total})");
                }
                SegmentOutcome::Failed { index, url, error } => {
                    tracing::error!("Segment {index} failed, max retries exceed. {error}");
                    match self.options.failure_policy {
                        SegmentFailurePolicy::Abort => {
                            tasks.abort_all();
                            return Err(KasaneError::SegmentFetch {
                                url: url.to_string(),
                                reason: error.to_string(),
                            });
                        }
                        SegmentFailurePolicy::BestEffort => report.failed.push(index),
                    }
                }
            }
        }

        if !report.failed.is_empty() {
            report.failed.sort_unstable();
            tracing::warn!(
                "{} segments are missing and will be left out: {:?}",
                report.failed.len(),
                report.failed
            );
        }
        Ok(report)
    }
}

/// Write `init` followed by every segment file in ascending index order.
pub async fn reassemble(
    init: Option<&[u8]>,
    report: &BatchReport,
    output: &Path,
) -> KasaneResult<()> {
    let mut writer = File::create(output).await?;
    if let Some(init) = init {
        writer.write_all(init).await?;
    }
    for path in report.files.values() {
        let mut segment = File::open(path).await?;
        tokio::io::copy(&mut segment, &mut writer).await?;
    }
    writer.flush().await?;
    Ok(())
}
