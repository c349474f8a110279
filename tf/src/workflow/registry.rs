//! MilestoneRegistry - ordered milestones with a single active one

use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Milestone, MilestoneStatus, now_ms};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Milestone already exists: {0}")]
    DuplicateMilestone(String),

    #[error("A workflow needs at least one milestone")]
    Empty,

    #[error("Inconsistent milestone registry: {0}")]
    Inconsistent(String),
}

/// Milestones in processing order
///
/// Exactly one milestone is Active until the last one completes; everything
/// before it is Complete and everything after it is Pending.
#[derive(Debug, Clone, Default)]
pub struct MilestoneRegistry {
    milestones: Vec<Milestone>,
}

impl MilestoneRegistry {
    /// Build a registry from milestones in order and activate the first one
    pub fn new(milestones: Vec<Milestone>) -> Result<Self, RegistryError> {
        debug!(count = milestones.len(), "MilestoneRegistry::new: called");
        if milestones.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut registry = Self {
            milestones: Vec::with_capacity(milestones.len()),
        };
        for mut milestone in milestones {
            if registry.contains(&milestone.id) {
                return Err(RegistryError::DuplicateMilestone(milestone.id));
            }
            milestone.ordinal = registry.milestones.len() as u32;
            milestone.status = MilestoneStatus::Pending;
            milestone.completed_at = None;
            registry.milestones.push(milestone);
        }

        registry.milestones[0].status = MilestoneStatus::Active;
        Ok(registry)
    }

    /// Rebuild a registry from checkpoint records, checking the status layout
    pub fn restore(mut milestones: Vec<Milestone>) -> Result<Self, RegistryError> {
        debug!(count = milestones.len(), "MilestoneRegistry::restore: called");
        if milestones.is_empty() {
            return Err(RegistryError::Empty);
        }
        milestones.sort_by_key(|m| m.ordinal);

        let mut seen = std::collections::HashSet::new();
        for (index, milestone) in milestones.iter().enumerate() {
            if !seen.insert(milestone.id.as_str()) {
                return Err(RegistryError::DuplicateMilestone(milestone.id.clone()));
            }
            if milestone.ordinal as usize != index {
                return Err(RegistryError::Inconsistent(format!(
                    "milestone '{}' has ordinal {} at position {}",
                    milestone.id, milestone.ordinal, index
                )));
            }
        }

        // complete* active? pending*, with an active one unless all are complete
        let completed = milestones.iter().take_while(|m| m.is_complete()).count();
        let rest = &milestones[completed..];
        let layout_ok = match rest.split_first() {
            None => true,
            Some((first, tail)) => {
                first.status == MilestoneStatus::Active && tail.iter().all(|m| m.status == MilestoneStatus::Pending)
            }
        };
        if !layout_ok {
            return Err(RegistryError::Inconsistent(
                "milestones must be complete, then one active, then pending".to_string(),
            ));
        }

        Ok(Self { milestones })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.milestones.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == id)
    }

    /// All milestones in order
    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    /// The milestone currently being worked, `None` once all are complete
    pub fn active(&self) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.status == MilestoneStatus::Active)
    }

    pub fn completed_count(&self) -> usize {
        self.milestones.iter().filter(|m| m.is_complete()).count()
    }

    pub fn all_complete(&self) -> bool {
        self.milestones.iter().all(|m| m.is_complete())
    }

    /// Complete the active milestone and activate the next one in order
    ///
    /// Returns the newly active milestone, or `None` when the last one was
    /// just completed (or nothing was active).
    pub fn advance(&mut self) -> Option<&Milestone> {
        let index = self.milestones.iter().position(|m| m.status == MilestoneStatus::Active)?;

        let current = &mut self.milestones[index];
        current.status = MilestoneStatus::Complete;
        current.completed_at = Some(now_ms());
        info!(milestone = %current.id, "Milestone complete");

        let next = self.milestones.get_mut(index + 1)?;
        next.status = MilestoneStatus::Active;
        info!(milestone = %next.id, ordinal = next.ordinal, "Milestone active");
        Some(&*next)
    }
}
