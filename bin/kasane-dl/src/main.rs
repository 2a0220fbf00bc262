use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::{Args, Parser};
use fake_user_agent::get_chrome_rua;
use kasane::{
    process::Tool, CommandRunner, DownloadContext, DownloadOptions, HttpClient, KasaneError,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Url,
};

mod config;

use config::Config;

#[derive(Parser, Debug, Clone)]
#[clap(name = "kasane", version, about = "Download a static MPEG-DASH manifest into one file")]
struct KasaneArgs {
    #[clap(flatten)]
    http: HttpOptions,

    #[clap(flatten)]
    select: SelectOptions,

    #[clap(flatten)]
    download: DownloadArgs,

    #[clap(flatten)]
    output: OutputOptions,

    /// TOML file with default values for every option
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Manifest URL
    url: Url,
}

#[derive(Args, Debug, Clone)]
struct HttpOptions {
    /// Additional HTTP headers, e.g. "Referer: https://example.com"
    #[clap(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Cookies sent with every request, e.g. "a=1; b=2"
    #[clap(long)]
    cookies: Option<String>,

    #[clap(long)]
    user_agent: Option<String>,

    /// HTTP timeout, in seconds
    #[clap(short, long)]
    timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct SelectOptions {
    /// `best`, a height such as `1080`, or `WxH`
    #[clap(short, long)]
    resolution: Option<String>,

    /// Audio language, or `all`
    #[clap(long)]
    audio_lang: Option<String>,

    /// Subtitle language, or `all`
    #[clap(long)]
    subtitle_lang: Option<String>,

    /// Skip periods whose id matches the regex, e.g. "^ad-"
    #[clap(long = "ignore-period")]
    ignore_periods: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct DownloadArgs {
    /// Decryption key as `<kid>:<key>`, repeat for several keys
    #[clap(short, long = "key")]
    keys: Vec<String>,

    /// Parallel segment downloads per representation
    #[clap(long)]
    concurrency: Option<usize>,

    /// Retry limit per segment
    #[clap(long)]
    retries: Option<u32>,

    /// `abort` or `best-effort`
    #[clap(long)]
    failure_policy: Option<String>,

    /// Temporary file path
    #[clap(long, env = "TEMP")]
    temp_dir: Option<PathBuf>,

    #[clap(long)]
    ffmpeg: Option<PathBuf>,

    #[clap(long)]
    mp4decrypt: Option<PathBuf>,

    #[clap(long)]
    mkvmerge: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct OutputOptions {
    /// Output file path. The extension becomes `.mkv` unless --no-mkv is given
    #[clap(short, long, default_value = "./output.mp4")]
    output: PathBuf,

    /// `period` or `format`
    #[clap(short, long)]
    merge: Option<String>,

    /// Keep the merged MP4 instead of converting it to Matroska
    #[clap(long)]
    no_mkv: bool,

    /// Keep decrypted tracks fragmented
    #[clap(long)]
    no_defragment: bool,
}

impl KasaneArgs {
    fn config(&self) -> anyhow::Result<Config> {
        match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => Ok(Config::default()),
        }
    }

    fn options(&self, config: &Config) -> anyhow::Result<DownloadOptions> {
        let mut builder = DownloadOptions::builder();

        if let Some(resolution) = self.select.resolution.as_ref().or(config.resolution.as_ref()) {
            builder = builder.resolution(resolution);
        }
        if let Some(lang) = self.select.audio_lang.as_ref().or(config.audio_language.as_ref()) {
            builder = builder.audio_language(lang);
        }
        if let Some(lang) = self
            .select
            .subtitle_lang
            .as_ref()
            .or(config.subtitle_language.as_ref())
        {
            builder = builder.subtitle_language(lang);
        }
        for pattern in prefer(&self.select.ignore_periods, &config.ignore_periods) {
            builder = builder.ignore_period(pattern);
        }
        for key in prefer(&self.download.keys, &config.keys) {
            builder = builder.key(key);
        }
        if let Some(strategy) = self.output.merge.as_ref().or(config.merge_strategy.as_ref()) {
            builder = builder.merge_strategy(strategy);
        }
        if let Some(convert) = self.output.no_mkv.then_some(false).or(config.convert_to_mkv) {
            builder = builder.convert_to_mkv(convert);
        }
        if let Some(defragment) = self.output.no_defragment.then_some(false).or(config.defragment) {
            builder = builder.defragment(defragment);
        }
        if let Some(policy) = self
            .download
            .failure_policy
            .as_ref()
            .or(config.failure_policy.as_ref())
        {
            builder = builder.failure_policy(policy);
        }
        if let Some(concurrency) = self.download.concurrency.or(config.concurrency) {
            builder = builder.concurrency(concurrency);
        }
        if let Some(retries) = self.download.retries.or(config.retries) {
            builder = builder.segment_retries(retries);
        }
        if let Some(timeout) = self.http.timeout.or(config.timeout) {
            builder = builder.fetch_timeout(Duration::from_secs(timeout));
        }
        if let Some(temp_dir) = self.download.temp_dir.as_ref().or(config.temp_dir.as_ref()) {
            builder = builder.temp_dir(existing_temp_dir(temp_dir)?);
        }

        Ok(builder.build()?)
    }

    /// `--user-agent`, the configured one, or a random Chrome user agent.
    fn user_agent(&self, config: &Config) -> String {
        self.http
            .user_agent
            .clone()
            .or_else(|| config.user_agent.clone())
            .unwrap_or_else(|| get_chrome_rua().to_string())
    }

    fn client(&self, config: &Config) -> anyhow::Result<HttpClient> {
        let mut headers = HeaderMap::new();
        for header in prefer(&self.http.headers, &config.headers) {
            let Some((key, value)) = header.split_once(':') else {
                bail!("Invalid header `{header}`, expected `Name: value`");
            };
            headers.insert(
                HeaderName::from_str(key.trim())?,
                HeaderValue::from_str(value.trim())?,
            );
        }

        let client = HttpClient::new(
            Client::builder()
                .default_headers(headers)
                .user_agent(self.user_agent(config)),
        )?;

        if let Some(cookies) = self.http.cookies.as_ref().or(config.cookies.as_ref()) {
            let cookies = cookies
                .split(';')
                .map(str::trim)
                .filter(|cookie| !cookie.is_empty())
                .map(ToString::to_string)
                .collect();
            client.add_cookies(cookies, self.url.clone())?;
        }
        Ok(client)
    }

    fn runner(&self, config: &Config) -> CommandRunner {
        let tools = [
            (Tool::Ffmpeg, &self.download.ffmpeg, &config.tools.ffmpeg),
            (Tool::Mp4Decrypt, &self.download.mp4decrypt, &config.tools.mp4decrypt),
            (Tool::MkvMerge, &self.download.mkvmerge, &config.tools.mkvmerge),
        ];

        let mut runner = CommandRunner::new();
        for (tool, flag, file) in tools {
            if let Some(path) = flag.as_ref().or(file.as_ref()) {
                runner = runner.with_tool_path(tool, path);
            }
        }
        runner
    }
}

/// Values given on the command line replace those of the config file.
fn prefer<'a>(flags: &'a [String], file: &'a [String]) -> &'a [String] {
    if flags.is_empty() {
        file
    } else {
        flags
    }
}

fn existing_temp_dir(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.exists() {
        tracing::error!("Temporary path directory does not exist.");
        bail!("Temporary path directory {} does not exist.", path.display());
    }
    let path = path.canonicalize()?;
    tracing::info!("Temporary path sets to {}", path.display());
    Ok(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = KasaneArgs::parse();

    let default_level = if args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.config()?;
    let options = args.options(&config)?;
    let context = DownloadContext::new(args.client(&config)?, args.runner(&config));

    let cancel = context.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cleaning up...");
            cancel.cancel();
        }
    });

    match context
        .download_url(&args.url, &options, &args.output.output)
        .await
    {
        Ok(path) => {
            println!("{}", path.display());
            Ok(())
        }
        Err(KasaneError::Cancelled) => bail!("Download cancelled"),
        Err(e) => Err(e.into()),
    }
}
