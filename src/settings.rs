use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG: &str = "er_crawler";
const ENV_PREFIX: &str = "ER";

/// Runtime configuration. Layered as defaults, then the TOML file, then
/// `ER_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub out_dir: PathBuf,
    pub timeout_secs: u64,
    /// Sent verbatim as the `Cookie` header when set.
    pub cookie: Option<String>,
    pub referer: String,
    /// Extra static request headers.
    pub headers: BTreeMap<String, String>,
    pub primary_contest: ContestSelector,
    pub secondary_contest: ContestSelector,
    pub progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let headers = [
            ("accept-language", "en-US,en;q=0.9"),
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Settings {
            base_url: "https://2025electionresults.comelec.gov.ph".to_string(),
            out_dir: PathBuf::from("output"),
            timeout_secs: 30,
            cookie: None,
            referer: "https://2025electionresults.comelec.gov.ph/er-result".to_string(),
            headers,
            primary_contest: ContestSelector::Label("SENATOR".to_string()),
            secondary_contest: ContestSelector::Label("PARTY LIST".to_string()),
            progress: true,
        }
    }
}

impl Settings {
    /// All headers to attach to every request, lowercase names.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        if !self.referer.is_empty() {
            out.push(("referer".to_string(), self.referer.clone()));
        }
        if let Some(cookie) = self.cookie.as_deref().filter(|c| !c.is_empty()) {
            out.push(("cookie".to_string(), cookie.to_string()));
        }
        out
    }

    pub fn contests(&self) -> ContestPair {
        ContestPair {
            primary: self.primary_contest.clone(),
            secondary: self.secondary_contest.clone(),
        }
    }
}

/// How a contest is located inside a return document.
///
/// `"#1"` selects by position, anything else is matched against the
/// contest name (case-insensitive substring).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ContestSelector {
    Label(String),
    Position(usize),
}

impl From<String> for ContestSelector {
    fn from(raw: String) -> Self {
        let trimmed = raw.trim();
        match trimmed.strip_prefix('#').and_then(|n| n.parse().ok()) {
            Some(idx) => ContestSelector::Position(idx),
            None => ContestSelector::Label(trimmed.to_string()),
        }
    }
}

impl fmt::Display for ContestSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContestSelector::Label(l) => write!(f, "{}", l),
            ContestSelector::Position(i) => write!(f, "#{}", i),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContestPair {
    pub primary: ContestSelector,
    pub secondary: ContestSelector,
}

pub fn load(path: Option<&Path>) -> Result<Settings> {
    let builder = match path {
        Some(p) => Config::builder().add_source(File::from(p)),
        None => Config::builder().add_source(File::with_name(DEFAULT_CONFIG).required(false)),
    };
    let cfg = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .context("Failed to read configuration")?;
    cfg.try_deserialize()
        .context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parsing() {
        assert_eq!(
            ContestSelector::from("#1".to_string()),
            ContestSelector::Position(1)
        );
        assert_eq!(
            ContestSelector::from(" Party List ".to_string()),
            ContestSelector::Label("Party List".to_string())
        );
        // not a number after '#', keep as label
        assert_eq!(
            ContestSelector::from("#abc".to_string()),
            ContestSelector::Label("#abc".to_string())
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawler.toml");
        std::fs::write(
            &path,
            "base_url = \"http://localhost:9000\"\n\
             cookie = \"__cf_bm=abc\"\n\
             primary_contest = \"#0\"\n\
             progress = false\n",
        )
        .unwrap();

        let s = load(Some(&path)).unwrap();
        assert_eq!(s.base_url, "http://localhost:9000");
        assert_eq!(s.primary_contest, ContestSelector::Position(0));
        assert_eq!(s.secondary_contest, ContestSelector::Label("PARTY LIST".into()));
        assert_eq!(s.timeout_secs, 30);
        assert!(!s.progress);

        let headers = s.request_headers();
        assert!(headers.contains(&("cookie".to_string(), "__cf_bm=abc".to_string())));
        assert!(headers.iter().any(|(k, _)| k == "referer"));
    }

    #[test]
    fn empty_cookie_is_not_sent() {
        let s = Settings {
            cookie: Some(String::new()),
            ..Settings::default()
        };
        assert!(s.request_headers().iter().all(|(k, _)| k != "cookie"));
    }
}
