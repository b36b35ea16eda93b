//! Built-in prompt templates for the three tiers.

use crate::domain::models::Tier;
use crate::domain::ports::{PromptProvider, TierPromptConfig};

const BASE_SYSTEM_PROMPT: &str = "You are a senior UX strategist and product consultant. \
You write concrete, evidence-driven analysis in Markdown. Use clear section headings, \
short paragraphs and prioritised recommendations. Never invent statistics; when you \
estimate, say so.";

const SINGLE_SHOT_TEMPLATE: &str = "Analyse the following product problem and produce a \
complete strategic UX assessment titled \"{title}\".\n\nProblem statement:\n{problem}\n\n\
Cover the core user problem, the most likely causes, and the five highest-impact \
recommendations with expected outcomes.";

const MULTI_PART_INITIAL_TEMPLATE: &str = "You are writing part {part} of {total} of a \
strategy report. This part is \"{title}\".\n\nProblem statement:\n{problem}\n\n\
Write only this part. Later parts will build on it, so end with the key conclusions \
in a short list.";

const MULTI_PART_CONTINUE_TEMPLATE: &str = "You are writing part {part} of {total} of a \
strategy report. This part is \"{title}\".\n\nContext from the earlier parts:\n{summary}\n\n\
Write only this part. Do not repeat earlier sections; build on their conclusions.";

/// Static prompt catalogue for Observer, Insider and Syndicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptProvider;

impl DefaultPromptProvider {
    fn titles(tier: Tier) -> Vec<String> {
        let titles: &[&str] = match tier {
            Tier::Standard => &["Strategic UX Assessment"],
            Tier::Medium => &["Discovery and Diagnosis", "Strategy and Roadmap"],
            Tier::Full => &[
                "Discovery and Problem Framing",
                "Competitive Landscape",
                "User Journey and Friction Analysis",
                "Strategic Recommendations",
                "Implementation Roadmap",
                "Risks, Metrics and Validation",
            ],
        };
        titles.iter().map(|t| (*t).to_string()).collect()
    }
}

impl PromptProvider for DefaultPromptProvider {
    fn tier_prompt_config(&self, tier: Tier) -> TierPromptConfig {
        let (initial_template, system_suffix) = match tier {
            Tier::Standard => (SINGLE_SHOT_TEMPLATE, "Keep the report focused and actionable."),
            Tier::Medium => (
                MULTI_PART_INITIAL_TEMPLATE,
                "This is an Insider report: go deeper than a quick assessment.",
            ),
            Tier::Full => (
                MULTI_PART_INITIAL_TEMPLATE,
                "This is a Syndicate report: exhaustive, board-ready analysis.",
            ),
        };

        TierPromptConfig {
            tier,
            system_prompt: format!("{BASE_SYSTEM_PROMPT} {system_suffix}"),
            part_titles: Self::titles(tier),
            initial_template: initial_template.to_string(),
            continue_template: MULTI_PART_CONTINUE_TEMPLATE.to_string(),
        }
    }
}
