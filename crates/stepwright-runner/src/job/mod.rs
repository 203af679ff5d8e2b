mod params;

pub use params::{ParamDef, Params};

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use stepwright::EngineConfig;

/// A replay job.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    /// Name of this job.
    pub name: String,

    /// Parameter definitions (optional).
    #[serde(default)]
    pub params: HashMap<String, ParamDef>,

    /// Page snapshot to replay against.
    pub page: PathBuf,

    /// Recording to replay.
    pub recording: PathBuf,

    /// Engine tuning; anything left out keeps its default.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Stop at the first failed step.
    #[serde(default = "Job::default_abort_on_failure")]
    pub abort_on_failure: bool,

    /// Directory relative paths are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Job {
    fn default_abort_on_failure() -> bool {
        true
    }

    /// Load a job from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_params(path, &Params::new())
    }

    /// Load a job from a YAML file with parameters.
    pub fn load_with_params<P: AsRef<Path>>(path: P, params: &Params) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut job = Self::parse_with_params(&content, params)?;
        job.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(job)
    }

    /// Parse a job from a YAML string (no params).
    pub fn parse(yaml: &str) -> Result<Self> {
        Self::parse_with_params(yaml, &Params::new())
    }

    /// Parse a job, filling `${name}` placeholders first.
    pub fn parse_with_params(yaml: &str, params: &Params) -> Result<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let defs: HashMap<String, ParamDef> = value
            .get("params")
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
            .unwrap_or_default();
        params::substitute_value(&mut value, params, &defs)?;

        let job: Job = serde_yaml::from_value(value)?;
        job.validate()?;
        Ok(job)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("name is required".into()));
        }
        if self.page.as_os_str().is_empty() {
            return Err(Error::Config("page is required".into()));
        }
        if self.recording.as_os_str().is_empty() {
            return Err(Error::Config("recording is required".into()));
        }
        self.engine
            .validate()
            .map_err(|e| Error::Config(format!("engine: {}", e)))
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Snapshot path, resolved against the job file's directory.
    pub fn page_path(&self) -> PathBuf {
        self.resolve(&self.page)
    }

    /// Recording path, resolved against the job file's directory.
    pub fn recording_path(&self) -> PathBuf {
        self.resolve(&self.recording)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_resolve_against_base_dir() {
        let job = Job::parse("name: a\npage: p/page.json\nrecording: /abs/rec.json\n")
            .unwrap()
            .with_base_dir("/jobs");
        assert_eq!(job.page_path(), PathBuf::from("/jobs/p/page.json"));
        assert_eq!(job.recording_path(), PathBuf::from("/abs/rec.json"));
    }

    #[test]
    fn test_params_fill_paths() {
        let yaml = r#"
name: "Checkout ${env}"
params:
  env:
    default: staging
  flow:
    required: true
page: snapshots/${env}.json
recording: recordings/${flow}.json
"#;
        let params = Params::new().set("flow", "guest");
        let job = Job::parse_with_params(yaml, &params).unwrap();
        assert_eq!(job.name, "Checkout staging");
        assert_eq!(job.page, PathBuf::from("snapshots/staging.json"));
        assert_eq!(job.recording, PathBuf::from("recordings/guest.json"));

        let err = Job::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("flow"));
    }
}
