//! Stage specifications.

use super::processor::{FnProcessor, StageProcessor};
use crate::context::StageContext;
use crate::core::DecisionKind;
use crate::errors::GateError;
use crate::utils::Payload;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// One stage of a gated pipeline: a name, a processor and the decision
/// kinds its control point offers.
#[derive(Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub processor: Arc<dyn StageProcessor>,
    /// Decision kinds offered at the stage's control point.
    pub allowed: BTreeSet<DecisionKind>,
}

impl StageSpec {
    /// Creates a stage offering `{Proceed, Reject}`.
    #[must_use]
    pub fn new(name: impl Into<String>, processor: Arc<dyn StageProcessor>) -> Self {
        Self {
            name: name.into(),
            processor,
            allowed: DecisionKind::read_only(),
        }
    }

    /// Creates a stage from a synchronous closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StageContext, Payload) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(FnProcessor::new(func)))
    }

    /// Lets reviewers correct the stage input with `Modify`.
    #[must_use]
    pub fn correctable(mut self) -> Self {
        self.allowed = DecisionKind::all();
        self
    }

    /// Sets the allowed decision kinds.
    #[must_use]
    pub fn with_allowed(mut self, kinds: impl IntoIterator<Item = DecisionKind>) -> Self {
        self.allowed = kinds.into_iter().collect();
        self
    }

    /// Returns true if the control point offers `kind`.
    #[must_use]
    pub fn allows(&self, kind: DecisionKind) -> bool {
        self.allowed.contains(&kind)
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or `Proceed` is not allowed.
    pub fn validate(&self) -> Result<(), GateError> {
        if self.name.trim().is_empty() {
            return Err(GateError::validation("Stage name cannot be empty or whitespace-only"));
        }
        if !self.allows(DecisionKind::Proceed) {
            return Err(GateError::validation(format!(
                "Stage '{}' must allow proceed decisions",
                self.name
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

/// Validates an ordered stage list.
///
/// # Errors
///
/// Returns an error for an empty list, duplicate names or an invalid stage.
pub fn validate_stages(stages: &[StageSpec]) -> Result<(), GateError> {
    if stages.is_empty() {
        return Err(GateError::validation("Pipeline must have at least one stage"));
    }

    let mut seen = HashSet::new();
    for stage in stages {
        stage.validate()?;
        if !seen.insert(stage.name.as_str()) {
            return Err(GateError::validation(format!("Duplicate stage name: '{}'", stage.name)));
        }
    }
    Ok(())
}
