//! Run definitions and run units
//!
//! A run definition is a TOML file:
//! ```toml
//! name = "train"
//! command = "python train.py --data {inputs.dataset} --lr {params.lr}"
//! source = "."
//! mode = "isolated"
//!
//! [environment]
//! build = "python -m venv {env_dir}"
//!
//! [inputs]
//! dataset = "data/train.csv"
//!
//! [params]
//! lr = "0.01"
//! ```
//! Relative paths resolve against the directory holding the definition.

use crate::error::RunError;
use codesnap_core::hash::hash_bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Mount point of the working directory inside a container
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// How the unit's command is run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Child process on the host
    #[default]
    Direct,
    /// Child process with a built environment's `bin` dir first on `PATH`
    #[serde(alias = "isolated")]
    IsolatedEnvironment,
    /// `docker run` with the working directory mounted
    #[serde(alias = "container", alias = "docker")]
    Containerized,
}

/// How to build the execution environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Explicit identity; derived from the other fields when absent
    pub key: Option<String>,
    /// Shell command building the environment; `{env_dir}` is substituted
    pub build: Option<String>,
    /// Container image (containerized mode)
    pub image: Option<String>,
}

impl EnvironmentSpec {
    /// Identity shared by every unit needing the same environment
    pub fn identity(&self, mode: ExecutionMode) -> String {
        if let Some(key) = &self.key {
            return key.clone();
        }
        let material = format!(
            "{:?}\0{}\0{}",
            mode,
            self.build.as_deref().unwrap_or(""),
            self.image.as_deref().unwrap_or("")
        );
        let digest = hash_bytes(material.as_bytes()).to_hex();
        format!("env-{}", &digest[..16])
    }
}

fn default_source() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> String {
    "outputs".to_string()
}

/// Parsed run definition file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDefinition {
    pub name: String,
    /// Command template with `{inputs.<name>}` / `{params.<name>}` placeholders
    pub command: String,
    #[serde(default = "default_source")]
    pub source: PathBuf,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub environment: EnvironmentSpec,
    #[serde(default)]
    pub inputs: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Output directory, relative to the working directory
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Keep the working directory after a successful run
    #[serde(default)]
    pub keep_workdir: bool,
}

impl RunDefinition {
    /// Load a definition file, resolving relative paths against its directory
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let invalid = |message: String| RunError::Definition {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let mut definition: RunDefinition = toml::from_str(&content).map_err(|e| invalid(e.to_string()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        definition.source = base.join(&definition.source);
        for input in definition.inputs.values_mut() {
            if input.is_relative() {
                *input = base.join(&*input);
            }
        }

        definition.validate().map_err(invalid)?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.command.trim().is_empty() {
            return Err("command must not be empty".to_string());
        }
        if self.mode == ExecutionMode::Containerized && self.environment.image.is_none() {
            return Err("containerized mode needs environment.image".to_string());
        }
        if Path::new(&self.output_dir).is_absolute() || self.output_dir.contains("..") {
            return Err("output_dir must stay inside the working directory".to_string());
        }
        Ok(())
    }
}

/// One execution of a run definition
#[derive(Debug, Clone)]
pub struct RunUnit {
    pub run_id: Ulid,
    pub definition: RunDefinition,
    /// Scratch directory owned by this run alone
    pub working_dir: PathBuf,
}

impl RunUnit {
    /// Create a unit with a fresh working directory under `workspace_root`
    pub fn create(definition: RunDefinition, workspace_root: &Path) -> Result<Self, RunError> {
        let run_id = Ulid::new();
        let root = if workspace_root.is_absolute() {
            workspace_root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| RunError::infra("resolving workspace root", e))?
                .join(workspace_root)
        };
        // Commands run with the working directory as cwd; every path they see is absolute
        let working_dir = root.join(run_id.to_string());
        for dir in [working_dir.join("logs"), working_dir.join(&definition.output_dir)] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| RunError::infra(&format!("creating {}", dir.display()), e))?;
        }
        Ok(Self {
            run_id,
            definition,
            working_dir,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.definition.mode
    }

    pub fn source_dir(&self) -> &Path {
        &self.definition.source
    }

    pub fn log_dir(&self) -> PathBuf {
        self.working_dir.join("logs")
    }

    pub fn user_log(&self) -> PathBuf {
        self.log_dir().join("user.log")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.working_dir.join(&self.definition.output_dir)
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.working_dir.join("inputs")
    }

    /// `host_path` as the unit's command sees it
    ///
    /// Containerized commands see the working directory at
    /// [`CONTAINER_WORKDIR`]; paths outside it and other modes are unchanged.
    pub fn command_path(&self, host_path: &Path) -> PathBuf {
        if self.mode() != ExecutionMode::Containerized {
            return host_path.to_path_buf();
        }
        match host_path.strip_prefix(&self.working_dir) {
            Ok(rel) => Path::new(CONTAINER_WORKDIR).join(rel),
            Err(_) => host_path.to_path_buf(),
        }
    }

    /// Stable snapshot project key of the unit's source folder
    pub fn project_key(&self) -> String {
        let source = std::fs::canonicalize(self.source_dir()).unwrap_or_else(|_| self.source_dir().to_path_buf());
        format!("{}:{}", self.definition.name, source.display())
    }
}
