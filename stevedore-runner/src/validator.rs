use std::collections::BTreeSet;

use stevedore_core::{ExecError, ExecOutcome, ExecSpec, Result};

/// Allow-list check applied once an exec is known to have finished.
///
/// An unset or empty allow-list accepts every exit code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitCodeValidator {
    allowed: Option<BTreeSet<i64>>,
}

impl ExitCodeValidator {
    pub fn new(allowed: Option<BTreeSet<i64>>) -> Self {
        Self { allowed }
    }

    pub fn allowing<I: IntoIterator<Item = i64>>(codes: I) -> Self {
        Self::new(Some(codes.into_iter().collect()))
    }

    pub fn is_enforced(&self) -> bool {
        self.allowed.as_ref().is_some_and(|codes| !codes.is_empty())
    }

    pub fn validate(&self, spec: &ExecSpec, outcome: &ExecOutcome) -> Result<()> {
        let allowed = match &self.allowed {
            Some(codes) if !codes.is_empty() => codes,
            _ => return Ok(()),
        };

        let exit_code = outcome.effective_exit_code();
        if allowed.contains(&exit_code) {
            return Ok(());
        }

        Err(ExecError::ExitCodeValidation {
            command: spec.display_command(),
            exit_code,
            allowed: allowed.iter().copied().collect(),
            response: outcome.clone(),
        })
    }
}
