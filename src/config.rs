//! Scheduling policy.  Each setting comes from, in order of preference, a
//! command-line flag, the environment, the manifest's `[settings]` table,
//! or a built-in default.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Thread counts above this are refused.
pub const MAX_THREADS: usize = 100;

pub const THREADS_ENV: &str = "PARTBUILD_THREADS";
pub const PAUSE_ENV: &str = "PARTBUILD_PAUSE_MS";
pub const DUPLICATES_ENV: &str = "PARTBUILD_ALLOW_DUPLICATE_SUBPARTS";

/// `[settings]` in the manifest.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub threads: Option<usize>,
    pub pause_ms: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
    pub allow_duplicate_subparts: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// 0 means build sequentially on the main thread.
    pub threads: usize,
    pub pause: Duration,
    /// How long the executor tolerates having nothing to run before it
    /// reports a stall.
    pub stall_timeout: Duration,
    pub allow_duplicate_subparts: bool,
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::build(format!("{}: invalid value {:?}", name, value)))
}

fn truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_THREADS)
}

impl Config {
    /// Resolve against the process environment.
    pub fn from_env(threads_flag: Option<usize>, settings: &Settings) -> Result<Config> {
        Config::resolve(threads_flag, settings, |name| std::env::var(name).ok())
    }

    pub fn resolve(
        threads_flag: Option<usize>,
        settings: &Settings,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Config> {
        let threads = match (threads_flag, env(THREADS_ENV)) {
            (Some(n), _) => n,
            (None, Some(v)) => parse_env(THREADS_ENV, &v)?,
            (None, None) => settings.threads.unwrap_or_else(default_threads),
        };
        if threads > MAX_THREADS {
            return Err(Error::build(format!(
                "thread count {} is out of range 0..={}",
                threads, MAX_THREADS
            )));
        }
        let pause_ms = match env(PAUSE_ENV) {
            Some(v) => parse_env(PAUSE_ENV, &v)?,
            None => settings.pause_ms.unwrap_or(100),
        };
        let allow_duplicate_subparts = match env(DUPLICATES_ENV) {
            Some(v) => truthy(&v),
            None => settings.allow_duplicate_subparts.unwrap_or(false),
        };
        Ok(Config {
            threads,
            pause: Duration::from_millis(pause_ms),
            stall_timeout: Duration::from_secs(settings.stall_timeout_secs.unwrap_or(5)),
            allow_duplicate_subparts,
        })
    }
}
