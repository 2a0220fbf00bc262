mod e2e;

use std::path::Path;

pub trait AssertWrapper {
    type Success;

    fn assert_success(self) -> Self::Success;
    fn assert_error(self);
}

impl<T, E> AssertWrapper for Result<T, E>
where
    E: std::fmt::Debug,
{
    type Success = T;

    fn assert_success(self) -> Self::Success {
        assert!(self.is_ok(), "{:?}", self.as_ref().err());
        self.unwrap()
    }

    fn assert_error(self) {
        assert!(self.is_err());
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Nothing may be left below the temp root once a download returns.
pub fn assert_empty_dir(path: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(path)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
}
