use std::{
    collections::BTreeMap, fmt, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration,
};

use regex::Regex;

use crate::error::{KasaneError, KasaneResult};

/// How a video Representation is picked from its Adaptation Set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResolutionMatcher {
    /// The Representation with the largest width.
    #[default]
    Best,
    /// The first Representation whose `{width}x{height}` contains the string,
    /// e.g. `1080` or `1920x1080`.
    Literal(String),
}

impl ResolutionMatcher {
    pub fn matches(&self, width: u64, height: u64) -> bool {
        match self {
            Self::Best => true,
            Self::Literal(literal) => format!("{width}x{height}").contains(literal.as_str()),
        }
    }
}

impl FromStr for ResolutionMatcher {
    type Err = KasaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("best") {
            return Ok(Self::Best);
        }

        let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        let valid = match s.split_once('x') {
            Some((width, height)) => is_number(width) && is_number(height),
            None => is_number(s),
        };
        if !valid {
            return Err(KasaneError::Configuration(format!(
                "resolution must be `best`, a height or `WxH`, got `{s}`"
            )));
        }
        Ok(Self::Literal(s.to_string()))
    }
}

impl fmt::Display for ResolutionMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => f.write_str("best"),
            Self::Literal(literal) => f.write_str(literal),
        }
    }
}

/// Language filter for audio and subtitle Adaptation Sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LanguageMatcher {
    #[default]
    All,
    /// Exact match against `@lang`. Sets without a language never match.
    Exact(String),
}

impl LanguageMatcher {
    pub fn accepts(&self, lang: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Exact(expected) => lang == Some(expected.as_str()),
        }
    }
}

impl FromStr for LanguageMatcher {
    type Err = KasaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(KasaneError::Configuration(
                "language must not be empty".to_string(),
            )),
            "all" => Ok(Self::All),
            lang => Ok(Self::Exact(lang.to_string())),
        }
    }
}

/// How Period outputs are combined into the final file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Mux audio and video inside every Period, then concatenate the Periods.
    #[default]
    PerPeriod,
    /// Concatenate audio across Periods and video across Periods, then mux once.
    PerFormat,
}

impl FromStr for MergeStrategy {
    type Err = KasaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "period" | "per-period" => Ok(Self::PerPeriod),
            "format" | "per-format" => Ok(Self::PerFormat),
            other => Err(KasaneError::Configuration(format!(
                "unknown merge strategy `{other}`"
            ))),
        }
    }
}

/// What happens to a Representation when one of its segments can not be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentFailurePolicy {
    /// Fail the Representation, and with it the whole download.
    #[default]
    Abort,
    /// Leave the missing segments out of the reassembled file.
    BestEffort,
}

impl FromStr for SegmentFailurePolicy {
    type Err = KasaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "abort" => Ok(Self::Abort),
            "best-effort" => Ok(Self::BestEffort),
            other => Err(KasaneError::Configuration(format!(
                "unknown segment failure policy `{other}`"
            ))),
        }
    }
}

/// `key id -> content key`, handed to mp4decrypt as `--key <id>:<key>`.
///
/// The id is either a 128-bit KID or a decimal track id. Hex values are
/// stored lowercase without dashes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecryptKeys(BTreeMap<String, String>);

impl DecryptKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kid: &str, key: &str) -> KasaneResult<()> {
        let kid = normalize_hex(kid);
        let key = normalize_hex(key);
        if !(is_track_id(&kid) || is_valid_hex_128(&kid)) || !is_valid_hex_128(&key) {
            return Err(KasaneError::InvalidClearKey(format!("{kid}:{key}")));
        }
        self.0.insert(kid, key);
        Ok(())
    }

    /// Parse a `<kid>:<key>` pair.
    pub fn insert_pair(&mut self, pair: &str) -> KasaneResult<()> {
        let (kid, key) = pair
            .split_once(':')
            .ok_or_else(|| KasaneError::InvalidClearKey(pair.to_string()))?;
        self.insert(kid, key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn normalize_hex(s: &str) -> String {
    s.trim().replace('-', "").to_ascii_lowercase()
}

fn is_valid_hex_128(s: &str) -> bool {
    s.len() == 32 && hex::decode(s).is_ok()
}

fn is_track_id(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Configuration shared by every stage of one download.
///
/// Built once by the caller and handed down by reference; nothing in the
/// pipeline mutates it.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub resolution: ResolutionMatcher,
    pub audio_language: LanguageMatcher,
    pub subtitle_language: LanguageMatcher,
    pub decrypt_keys: DecryptKeys,
    /// Periods whose id matches any of these patterns (anchored at the start
    /// of the id) are skipped.
    pub ignored_periods: Vec<Regex>,
    pub merge_strategy: MergeStrategy,
    /// Remux the final file into Matroska.
    pub convert_to_mkv: bool,
    /// Rewrite every downloaded track, encrypted or not, into a
    /// non-fragmented MP4.
    pub defragment: bool,
    pub failure_policy: SegmentFailurePolicy,
    /// Parallel segment fetches per Representation.
    pub concurrency: NonZeroUsize,
    pub segment_retries: u32,
    pub fetch_timeout: Duration,
    /// Root for temporary directories. Defaults to the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            resolution: ResolutionMatcher::Best,
            audio_language: LanguageMatcher::All,
            subtitle_language: LanguageMatcher::All,
            decrypt_keys: DecryptKeys::new(),
            ignored_periods: Vec::new(),
            merge_strategy: MergeStrategy::PerPeriod,
            convert_to_mkv: true,
            defragment: true,
            failure_policy: SegmentFailurePolicy::Abort,
            concurrency: default_concurrency(),
            segment_retries: 3,
            fetch_timeout: Duration::from_secs(30),
            temp_dir: None,
        }
    }
}

impl DownloadOptions {
    pub fn builder() -> DownloadOptionsBuilder {
        DownloadOptionsBuilder::default()
    }

    pub fn is_period_ignored(&self, period_id: &str) -> bool {
        self.ignored_periods.iter().any(|pattern| {
            pattern
                .find(period_id)
                .is_some_and(|found| found.start() == 0)
        })
    }
}

/// 75% of the available parallelism, but never less than 4.
pub fn default_concurrency() -> NonZeroUsize {
    let available = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    NonZeroUsize::new((available * 3 / 4).max(4)).unwrap_or(NonZeroUsize::MIN)
}

/// Collects options from loosely typed sources (CLI flags, config files) and
/// validates them all at once in [`DownloadOptionsBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOptionsBuilder {
    resolution: Option<String>,
    audio_language: Option<String>,
    subtitle_language: Option<String>,
    keys: Vec<String>,
    ignored_periods: Vec<String>,
    merge_strategy: Option<String>,
    convert_to_mkv: Option<bool>,
    defragment: Option<bool>,
    failure_policy: Option<String>,
    concurrency: Option<usize>,
    segment_retries: Option<u32>,
    fetch_timeout: Option<Duration>,
    temp_dir: Option<PathBuf>,
}

impl DownloadOptionsBuilder {
    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn audio_language(mut self, language: impl Into<String>) -> Self {
        self.audio_language = Some(language.into());
        self
    }

    pub fn subtitle_language(mut self, language: impl Into<String>) -> Self {
        self.subtitle_language = Some(language.into());
        self
    }

    /// Add a `<kid>:<key>` pair.
    pub fn key(mut self, pair: impl Into<String>) -> Self {
        self.keys.push(pair.into());
        self
    }

    pub fn ignore_period(mut self, pattern: impl Into<String>) -> Self {
        self.ignored_periods.push(pattern.into());
        self
    }

    pub fn merge_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.merge_strategy = Some(strategy.into());
        self
    }

    pub fn convert_to_mkv(mut self, convert: bool) -> Self {
        self.convert_to_mkv = Some(convert);
        self
    }

    pub fn defragment(mut self, defragment: bool) -> Self {
        self.defragment = Some(defragment);
        self
    }

    pub fn failure_policy(mut self, policy: impl Into<String>) -> Self {
        self.failure_policy = Some(policy.into());
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn segment_retries(mut self, retries: u32) -> Self {
        self.segment_retries = Some(retries);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    pub fn build(self) -> KasaneResult<DownloadOptions> {
        let mut options = DownloadOptions::default();

        if let Some(resolution) = self.resolution {
            options.resolution = resolution.parse()?;
        }
        if let Some(language) = self.audio_language {
            options.audio_language = language.parse()?;
        }
        if let Some(language) = self.subtitle_language {
            options.subtitle_language = language.parse()?;
        }
        for pair in self.keys {
            options.decrypt_keys.insert_pair(&pair)?;
        }
        for pattern in self.ignored_periods {
            let regex = Regex::new(&pattern).map_err(|e| {
                KasaneError::Configuration(format!("invalid period pattern `{pattern}`: {e}"))
            })?;
            options.ignored_periods.push(regex);
        }
        if let Some(strategy) = self.merge_strategy {
            options.merge_strategy = strategy.parse()?;
        }
        if let Some(convert) = self.convert_to_mkv {
            options.convert_to_mkv = convert;
        }
        if let Some(defragment) = self.defragment {
            options.defragment = defragment;
        }
        if let Some(policy) = self.failure_policy {
            options.failure_policy = policy.parse()?;
        }
        if let Some(concurrency) = self.concurrency {
            options.concurrency = NonZeroUsize::new(concurrency).ok_or_else(|| {
                KasaneError::Configuration("concurrency must be at least 1".to_string())
            })?;
        }
        if let Some(retries) = self.segment_retries {
            options.segment_retries = retries;
        }
        if let Some(timeout) = self.fetch_timeout {
            if timeout.is_zero() {
                return Err(KasaneError::Configuration(
                    "fetch timeout must be positive".to_string(),
                ));
            }
            options.fetch_timeout = timeout;
        }
        options.temp_dir = self.temp_dir;

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KID: &str = "0123456789abcdef0123456789abcdef";
    const KEY: &str = "fedcba9876543210fedcba9876543210";

    #[test]
    fn test_resolution_matcher_parse() {
        assert_eq!("best".parse::<ResolutionMatcher>().unwrap(), ResolutionMatcher::Best);
        assert_eq!(
            "1080".parse::<ResolutionMatcher>().unwrap(),
            ResolutionMatcher::Literal("1080".to_string())
        );
        assert_eq!(
            "1920x1080".parse::<ResolutionMatcher>().unwrap(),
            ResolutionMatcher::Literal("1920x1080".to_string())
        );
        assert!("hd".parse::<ResolutionMatcher>().is_err());
        assert!("1920x".parse::<ResolutionMatcher>().is_err());
        assert!("".parse::<ResolutionMatcher>().is_err());
    }

    #[test]
    fn test_resolution_matcher_substring() {
        let matcher = ResolutionMatcher::Literal("720".to_string());
        assert!(matcher.matches(1280, 720));
        assert!(matcher.matches(720, 576));
        assert!(!matcher.matches(1920, 1080));
    }

    #[test]
    fn test_language_matcher() {
        assert!(LanguageMatcher::All.accepts(None));
        let nl: LanguageMatcher = "nl".parse().unwrap();
        assert!(nl.accepts(Some("nl")));
        assert!(!nl.accepts(Some("nld")));
        assert!(!nl.accepts(None));
    }

    #[test]
    fn test_merge_strategy_parse() {
        assert_eq!("period".parse::<MergeStrategy>().unwrap(), MergeStrategy::PerPeriod);
        assert_eq!("per-format".parse::<MergeStrategy>().unwrap(), MergeStrategy::PerFormat);
        assert!(matches!(
            "interleave".parse::<MergeStrategy>(),
            Err(KasaneError::Configuration(_))
        ));
    }

    #[test]
    fn test_decrypt_keys() {
        let mut keys = DecryptKeys::new();
        keys.insert_pair(&format!("{}:{KEY}", KID.to_uppercase())).unwrap();
        assert_eq!(keys.iter().collect::<Vec<_>>(), vec![(KID, KEY)]);

        // the key itself must still be 128 bits
        assert!(keys.insert_pair("08:1234").is_err());
        assert!(keys.insert_pair(KID).is_err());
        assert!(keys.insert_pair(&format!("track1:{KEY}")).is_err());
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_decrypt_keys_by_track_id() {
        let mut keys = DecryptKeys::new();
        keys.insert_pair("1:00112233445566778899aabbccddeeff").unwrap();
        keys.insert_pair(&format!("08:{KEY}")).unwrap();

        assert_eq!(
            keys.iter().collect::<Vec<_>>(),
            vec![("08", KEY), ("1", "00112233445566778899aabbccddeeff")]
        );
    }

    #[test]
    fn test_period_ignored_is_anchored() {
        let options = DownloadOptions::builder()
            .ignore_period("ad-")
            .ignore_period("^pre-roll.*")
            .build()
            .unwrap();

        assert!(options.is_period_ignored("ad-1"));
        assert!(options.is_period_ignored("pre-roll-0"));
        assert!(!options.is_period_ignored("main-ad-1"));
        assert!(!options.is_period_ignored("main"));
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(DownloadOptions::builder().merge_strategy("mixed").build().is_err());
        assert!(DownloadOptions::builder().ignore_period("(").build().is_err());
        assert!(DownloadOptions::builder().concurrency(0).build().is_err());
        assert!(DownloadOptions::builder().failure_policy("ignore").build().is_err());
        assert!(DownloadOptions::builder()
            .fetch_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_defaults_are_fresh() {
        let mut first = DownloadOptions::default();
        first.decrypt_keys.insert(KID, KEY).unwrap();
        first.ignored_periods.push(Regex::new("x").unwrap());

        let second = DownloadOptions::default();
        assert!(second.decrypt_keys.is_empty());
        assert!(second.ignored_periods.is_empty());
        assert!(second.concurrency.get() >= 4);
    }
}
