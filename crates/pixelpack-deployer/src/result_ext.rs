//! `log` helper for `Result`.

use std::fmt::Display;
use tracing::error;

/// Extension trait for logging errors with context.
pub trait ResultExt<T, E> {
    /// Log the error with `context` and the caller's location, returning `self` unchanged.
    ///
    /// ```ignore
    /// use pixelpack_deployer::result_ext::ResultExt;
    ///
    /// let config = DeployerConfig::from_env().log("loading deployer configuration")?;
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "pixelpack_deployer",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ext_passes_through() {
        let ok: Result<u64, &str> = Ok(31337);
        assert_eq!(ok.log("resolving chain id"), Ok(31337));

        let err: Result<u64, &str> = Err("unknown network");
        assert_eq!(err.log("resolving chain id"), Err("unknown network"));
    }
}
