//! # stepwright-runner
//!
//! Replay stored recordings from YAML job files. A job names a page snapshot
//! and a recording; the runner loads both, replays every step through the
//! engine and reports what happened.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stepwright_runner::{Job, Runner};
//!
//! # #[tokio::main]
//! # async fn main() -> stepwright_runner::Result<()> {
//! let job = Job::load("login.yaml")?;
//! let result = Runner::new(job).run().await?;
//! println!("Success: {}", result.success);
//! # Ok(())
//! # }
//! ```
//!
//! ## Job format
//!
//! ```yaml
//! name: "Login flow"
//! page: snapshots/login.json
//! recording: recordings/login.json
//! abort_on_failure: true
//!
//! engine:
//!   resolver:
//!     timeout_ms: 3000
//!   replay:
//!     step_delay_ms: 100
//!     step_jitter_ms: 0
//! ```
//!
//! `replay --live <url>` replays on a real Chrome tab instead of the snapshot.
//!
//! Paths are relative to the job file. `${name}` placeholders are filled from
//! `-P name=value` arguments or the job's `params` defaults.

mod capture;
mod job;
mod live;
mod runner;

pub use capture::{capture_page, CaptureOptions, SNAPSHOT_JS};
pub use job::{Job, ParamDef, Params};
pub use live::{locate, Hop, LivePage, Locator};
pub use runner::{CheckSummary, RunResult, Runner};

/// Result type for stepwright-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or running a job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("engine error: {0}")]
    Engine(#[from] stepwright::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_job() {
        let yaml = r#"
name: "Minimal"
page: page.json
recording: steps.json
"#;
        let job = Job::parse(yaml).unwrap();
        assert_eq!(job.name, "Minimal");
        assert!(job.abort_on_failure);
        assert_eq!(job.engine, stepwright::EngineConfig::default());
    }

    #[test]
    fn test_parse_engine_overrides() {
        let yaml = r#"
name: "Tuned"
page: page.json
recording: steps.json
abort_on_failure: false
engine:
  resolver:
    timeout_ms: 1200
  executor:
    settle_ms: 0
  poller:
    search_terms: ["Accept"]
"#;
        let job = Job::parse(yaml).unwrap();
        assert!(!job.abort_on_failure);
        assert_eq!(job.engine.resolver.timeout_ms, 1200);
        assert_eq!(job.engine.resolver.retry_interval_ms, 250);
        assert_eq!(job.engine.executor.settle_ms, 0);
        assert_eq!(job.engine.poller.search_terms, vec!["Accept"]);
    }

    #[test]
    fn test_validation_missing_name() {
        let yaml = r#"
name: ""
page: page.json
recording: steps.json
"#;
        let result = Job::parse(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("name"));
    }

    #[test]
    fn test_validation_bad_engine_section() {
        let yaml = r#"
name: "Bad"
page: page.json
recording: steps.json
engine:
  resolver:
    fuzzy_threshold: 2.0
"#;
        let err = Job::parse(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("fuzzy_threshold"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let yaml = r#"
name: "Typo"
page: page.json
recording: steps.json
abort_on_fail: true
"#;
        assert!(matches!(Job::parse(yaml), Err(Error::Yaml(_))));
    }
}
