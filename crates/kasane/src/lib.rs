pub mod decrypt;
pub mod download;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod mpd;
pub mod options;
pub mod process;
pub mod select;
pub mod util;

pub use download::DownloadContext;
pub use error::{KasaneError, KasaneResult};
pub use fetch::Fetcher;
pub use mpd::Manifest;
pub use options::{DownloadOptions, DownloadOptionsBuilder};
pub use process::{CommandRunner, ProcessRunner};
pub use util::http::HttpClient;
