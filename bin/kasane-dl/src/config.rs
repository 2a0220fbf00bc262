use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Defaults read from `--config`. Every field can be overridden by a flag.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub resolution: Option<String>,
    pub audio_language: Option<String>,
    pub subtitle_language: Option<String>,
    /// `<kid>:<key>` pairs.
    pub keys: Vec<String>,
    pub ignore_periods: Vec<String>,
    pub merge_strategy: Option<String>,
    pub convert_to_mkv: Option<bool>,
    pub defragment: Option<bool>,
    pub failure_policy: Option<String>,
    pub concurrency: Option<usize>,
    pub retries: Option<u32>,
    /// In seconds.
    pub timeout: Option<u64>,
    pub temp_dir: Option<PathBuf>,

    pub headers: Vec<String>,
    pub cookies: Option<String>,
    pub user_agent: Option<String>,

    pub tools: ToolPaths,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: Option<PathBuf>,
    pub mp4decrypt: Option<PathBuf>,
    pub mkvmerge: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() -> anyhow::Result<()> {
        let config: Config = toml::from_str(
            r#"
            resolution = "1080"
            keys = ["0123456789abcdef0123456789abcdef:00112233445566778899aabbccddeeff"]
            ignore-periods = ["^ad-"]
            convert-to-mkv = false
            timeout = 10

            [tools]
            ffmpeg = "/opt/ffmpeg/bin/ffmpeg"
            "#,
        )?;

        assert_eq!(config.resolution.as_deref(), Some("1080"));
        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.ignore_periods, vec!["^ad-".to_string()]);
        assert_eq!(config.convert_to_mkv, Some(false));
        assert_eq!(config.defragment, None);
        assert_eq!(config.timeout, Some(10));
        assert_eq!(
            config.tools.ffmpeg,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
        Ok(())
    }

    #[test]
    fn test_mistyped_values_are_rejected() {
        assert!(toml::from_str::<Config>("concurrency = \"many\"").is_err());
    }
}
