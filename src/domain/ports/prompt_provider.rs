use crate::domain::models::{PartNumber, Tier};

/// Prompt templates for one tier.
///
/// Templates use `{problem}`, `{part}`, `{total}`, `{title}` and
/// `{summary}` placeholders.
#[derive(Debug, Clone)]
pub struct TierPromptConfig {
    pub tier: Tier,
    pub system_prompt: String,
    /// One title per part, in order. Its length is the tier's part count.
    pub part_titles: Vec<String>,
    pub initial_template: String,
    pub continue_template: String,
}

impl TierPromptConfig {
    pub fn parts(&self) -> u8 {
        self.tier.part_count()
    }

    /// Section title for a part, falling back to a numbered heading.
    pub fn part_title(&self, part: PartNumber) -> String {
        self.part_titles
            .get(part.index())
            .cloned()
            .unwrap_or_else(|| format!("Part {part}"))
    }

    /// Prompt for the first (or only) call of a run.
    pub fn initial_prompt(&self, problem: &str) -> String {
        let first = PartNumber::FIRST;
        self.initial_template
            .replace("{problem}", problem)
            .replace("{part}", &first.to_string())
            .replace("{total}", &self.parts().to_string())
            .replace("{title}", &self.part_title(first))
    }

    /// Prompt for a later part, given the condensed handoff summary.
    pub fn continue_prompt(&self, part: PartNumber, previous_summary: &str) -> String {
        self.continue_template
            .replace("{summary}", previous_summary)
            .replace("{part}", &part.to_string())
            .replace("{total}", &self.parts().to_string())
            .replace("{title}", &self.part_title(part))
    }
}

/// Supplies per-tier prompt configuration. Pure data lookup.
pub trait PromptProvider: Send + Sync {
    fn tier_prompt_config(&self, tier: Tier) -> TierPromptConfig;
}
