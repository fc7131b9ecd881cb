//! convenience fns for parsing env vars
use anyhow::Context;

use std::{env, str};

/// Returns the value of the environment variable with the given key. If it
/// doesn't exist, returns `default` cast to `T`
/// # Examples
/// ```
/// # use std::{env, io};
/// unsafe { env::set_var("DUET_DOC_KEY", "value") };
/// let val: String = duet_core::env::parse_var("DUET_DOC_KEY", "default_value").unwrap();
/// assert_eq!(val, "value");
/// unsafe { env::remove_var("DUET_DOC_KEY") };
///
/// let val: String = duet_core::env::parse_var("DUET_DOC_KEY", "default_value").unwrap();
/// assert_eq!(val, "default_value");
/// # Ok::<(), io::Error>(())
/// ```
pub fn parse_var<T, S>(name: &str, default: S) -> Result<T, <T as str::FromStr>::Err>
where
    T: str::FromStr,
    S: ToString,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
}

/// Calls [`parse_var`] but the error names the variable
///
/// [`parse_var`]: crate::env::parse_var
pub fn parse_var_with_err<T, S>(name: &str, default: S) -> anyhow::Result<T>
where
    T: str::FromStr,
    <T as str::FromStr>::Err: std::error::Error + Send + Sync + 'static,
    S: ToString + Send,
{
    parse_var::<T, S>(name, default).with_context(|| format!("error parsing env var {name}"))
}
