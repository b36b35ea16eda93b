//! In-memory accumulation of generated parts for one run.

use crate::domain::errors::DomainError;
use crate::domain::models::{PartNumber, Tier, MAX_PARTS};
use crate::domain::ports::TierPromptConfig;

/// Collects part content for a single orchestration run.
///
/// Seeded with previously completed parts on resume; each new part is
/// also persisted to the result row by the orchestrator, so dropping the
/// manager loses nothing.
#[derive(Debug, Clone)]
pub struct PartialResultsManager {
    tier: Tier,
    parts: [Option<String>; MAX_PARTS],
}

impl PartialResultsManager {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            parts: Default::default(),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Record a completed part. Re-marking a part replaces its content.
    pub fn mark_part_complete(
        &mut self,
        part: PartNumber,
        content: impl Into<String>,
    ) -> Result<(), DomainError> {
        let part = PartNumber::for_tier(part.get(), self.tier)?;
        self.parts[part.index()] = Some(content.into());
        Ok(())
    }

    pub fn is_part_complete(&self, part: PartNumber) -> bool {
        self.parts[part.index()].is_some()
    }

    /// Completed parts in ascending order.
    pub fn get_completed_parts(&self) -> Vec<(PartNumber, &str)> {
        self.tier
            .parts()
            .filter_map(|p| self.parts[p.index()].as_deref().map(|c| (p, c)))
            .collect()
    }

    pub fn completed_count(&self) -> u8 {
        self.tier
            .parts()
            .filter(|p| self.parts[p.index()].is_some())
            .fold(0, |n, _| n + 1)
    }

    pub fn missing_parts(&self) -> Vec<PartNumber> {
        self.tier
            .parts()
            .filter(|p| self.parts[p.index()].is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_count() == self.tier.part_count()
    }

    pub fn get_completion_percentage(&self) -> f64 {
        f64::from(self.completed_count()) / f64::from(self.tier.part_count()) * 100.0
    }

    /// Whether enough parts exist to deliver a degraded report.
    pub fn meets_partial_threshold(&self, min_parts: u8) -> bool {
        let completed = self.completed_count();
        completed > 0 && completed >= min_parts
    }

    fn render_parts(&self, prompts: &TierPromptConfig) -> String {
        self.get_completed_parts()
            .into_iter()
            .map(|(part, content)| {
                format!(
                    "## Part {}: {}\n\n{}",
                    part,
                    prompts.part_title(part),
                    content.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn heading(&self) -> String {
        format!("# {} Strategy Report", self.tier.display_name())
    }

    /// The full report. Single-shot reports are returned unwrapped.
    pub fn generate_full_markdown(&self, prompts: &TierPromptConfig) -> String {
        if self.tier.is_single_shot() {
            return self.parts[0].clone().unwrap_or_default();
        }
        format!("{}\n\n{}\n", self.heading(), self.render_parts(prompts))
    }

    /// Completed parts in order, missing parts omitted, with a trailing
    /// note that the report is partial.
    pub fn generate_partial_markdown(&self, prompts: &TierPromptConfig) -> String {
        let missing: Vec<String> = self.missing_parts().iter().map(|p| p.to_string()).collect();
        let note = format!(
            "---\n\n> **Partial report.** {} of {} parts were generated. \
             Missing part(s): {}. Our team has been notified and will complete them.",
            self.completed_count(),
            self.tier.part_count(),
            if missing.is_empty() {
                "none".to_string()
            } else {
                missing.join(", ")
            }
        );
        format!("{}\n\n{}\n\n{}\n", self.heading(), self.render_parts(prompts), note)
    }
}
