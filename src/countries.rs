use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::config::CountrySourceOptions;

#[derive(Debug, Deserialize)]
struct CountryEntry {
    name: CountryName,
}

#[derive(Debug, Deserialize)]
struct CountryName {
    common: String,
}

/// Extracts display names from a `[{"name": {"common": ..}}]` payload,
/// sorted and without duplicates.
pub fn parse_country_names(body: &str) -> Result<Vec<String>> {
    let entries: Vec<CountryEntry> =
        serde_json::from_str(body).context("decoding country list payload")?;
    let mut names: Vec<String> = entries
        .into_iter()
        .map(|entry| entry.name.common.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

pub fn fetch_country_names(options: &CountrySourceOptions) -> Result<Vec<String>> {
    let timeout = Duration::from_millis(options.timeout_ms);
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .build();
    let body = match agent.get(&options.url).call() {
        Ok(resp) => resp
            .into_string()
            .with_context(|| format!("reading country list from {}", options.url))?,
        Err(ureq::Error::Status(code, _)) => {
            bail!("country list request to {} failed with http status {code}", options.url)
        }
        Err(ureq::Error::Transport(err)) => bail!("country list transport error: {err}"),
    };
    parse_country_names(&body)
}

/// Country names shared between the background fetch and the UI. Empty
/// until a fetch succeeds.
#[derive(Debug, Clone, Default)]
pub struct CountryList {
    names: Arc<RwLock<Vec<String>>>,
}

impl CountryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.names.read().clone()
    }

    pub fn replace(&self, names: Vec<String>) {
        *self.names.write() = names;
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.read().iter().any(|candidate| candidate == name)
    }

    /// The name `step` places after (or before, when negative) `current`,
    /// wrapping around. Starts from the first entry when `current` is unknown.
    pub fn cycle(&self, current: &str, step: isize) -> Option<String> {
        let names = self.names.read();
        if names.is_empty() {
            return None;
        }
        let len = names.len() as isize;
        let next = match names.iter().position(|name| name == current) {
            Some(pos) => (pos as isize + step).rem_euclid(len),
            None => 0,
        };
        names.get(next as usize).cloned()
    }
}

/// Fetches the list once on a worker thread and publishes it into `list`.
/// Failures are logged and leave the list as it was.
pub fn spawn_fetch(options: CountrySourceOptions, list: CountryList) -> Option<thread::JoinHandle<()>> {
    if !options.enabled {
        tracing::debug!("country lookup disabled");
        return None;
    }
    let handle = thread::spawn(move || match fetch_country_names(&options) {
        Ok(names) => {
            tracing::info!(count = names.len(), "country list loaded");
            list.replace(names);
        }
        Err(err) => {
            tracing::warn!(?err, url = %options.url, "country list unavailable");
        }
    });
    Some(handle)
}
