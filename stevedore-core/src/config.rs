use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};
use crate::models::{ExecSpec, ProbeConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecPlan {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_on_exit_codes: Option<BTreeSet<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeConfig>,
    #[serde(default, rename = "exec")]
    pub execs: Vec<ExecSpec>,
}

impl ExecPlan {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ExecError::Config(format!("failed to read plan at {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let plan: ExecPlan = toml::from_str(input)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container.trim().is_empty() {
            return Err(ExecError::Config("container must not be empty".to_string()));
        }
        if self.execs.is_empty() {
            return Err(ExecError::Config(
                "plan must declare at least one [[exec]] entry".to_string(),
            ));
        }
        for (idx, spec) in self.execs.iter().enumerate() {
            spec.validate().map_err(|e| {
                ExecError::Config(format!("exec #{}: {}", idx + 1, e))
            })?;
        }
        Ok(())
    }

    /// Effective probe policy; the default applies when the plan sets none.
    pub fn probe_or_default(&self) -> ProbeConfig {
        self.probe.unwrap_or_default()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ExecError::Config(e.to_string()))
    }
}
