//! Typed access to the `CONVEYOR_*` environment variables the daemons
//! are configured through.

use anyhow::{Context as _, Result, bail};
use std::env::VarError;
use std::error::Error;
use std::str::FromStr;
use tracing::trace;

/// Read and parse `var`, substituting `default` when it is not set.
pub fn env<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    Ok(maybe_env(var)?.unwrap_or(default))
}

/// Read and parse `var`, failing when it is not set.
pub fn require_env<T>(var: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    maybe_env(var)?
        .with_context(|| format!("environment variable {var} is required but not set"))
}

/// Read and parse `var` when it is present.
pub fn maybe_env<T>(var: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(raw) => {
            let parsed = raw
                .parse()
                .with_context(|| format!("could not parse environment variable {var}"))?;
            Ok(Some(parsed))
        }
        Err(VarError::NotPresent) => {
            trace!("environment variable {var} is not set");
            Ok(None)
        }
        Err(VarError::NotUnicode(_)) => {
            bail!("environment variable {var} is not valid UTF-8")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // each test uses its own variable name so the process-global
    // environment is never shared between them
    fn set(var: &str, value: &str) {
        unsafe { std::env::set_var(var, value) };
    }

    #[test]
    fn env_returns_the_default_when_unset() {
        assert_eq!(env("CONVEYOR_TEST_UNSET", 7u32).unwrap(), 7);
    }

    #[test]
    fn env_parses_a_set_variable() {
        set("CONVEYOR_TEST_SET", "42");
        assert_eq!(env("CONVEYOR_TEST_SET", 7u32).unwrap(), 42);
    }

    #[test]
    fn unparsable_values_are_an_error_naming_the_variable() {
        set("CONVEYOR_TEST_BROKEN", "not a number");
        let err = env("CONVEYOR_TEST_BROKEN", 7u32).unwrap_err();
        assert!(err.to_string().contains("CONVEYOR_TEST_BROKEN"));
    }

    #[test]
    fn require_env_fails_when_unset() {
        let err = require_env::<u32>("CONVEYOR_TEST_REQUIRED").unwrap_err();
        assert!(err.to_string().contains("required but not set"));
    }

    #[test]
    fn maybe_env_distinguishes_unset_from_set() {
        assert_eq!(maybe_env::<u32>("CONVEYOR_TEST_MAYBE").unwrap(), None);
        set("CONVEYOR_TEST_MAYBE", "3");
        assert_eq!(maybe_env::<u32>("CONVEYOR_TEST_MAYBE").unwrap(), Some(3));
    }
}
