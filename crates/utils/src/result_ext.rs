use std::fmt::Display;

/// Extension methods for results whose errors should be logged
/// rather than propagated.
pub trait ResultExt<T, E: Display> {
    /// Return the Ok value unchanged. In the err case, log it, and call the closure to compute the default
    fn log_err_or_else<F>(self, default: F) -> T
    where
        F: FnOnce() -> T;

    /// Return the Ok value unchanged. In the err case, log it, and return the default value
    fn log_err_default(self) -> T
    where
        T: Default;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log_err_or_else<F>(self, default: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("{e:#}");
                default()
            }
        }
    }

    #[track_caller]
    fn log_err_default(self) -> T
    where
        T: Default,
    {
        self.log_err_or_else(Default::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_err() {
        let ok: Result<u32, std::io::Error> = Ok(42);
        assert_eq!(ok.log_err_default(), 42);

        let err: Result<u32, anyhow::Error> = Err(anyhow::anyhow!("oops"));
        assert_eq!(err.log_err_default(), 0);

        let err: Result<&str, anyhow::Error> = Err(anyhow::anyhow!("oops"));
        assert_eq!(err.log_err_or_else(|| "fallback"), "fallback");
    }
}
