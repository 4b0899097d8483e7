//! Prompt templates: system prompts per role and stage instructions.
//!
//! Wording is configuration data. The orchestrator relies only on the
//! `Stage: <LABEL>` line and the statement label formats defined here.

use crate::agent::AgentRole;
use crate::debate::state::Stage;
use crate::debate::topic::DebateTopic;

/// Shared rules for every council member.
pub const BASE_DEBATE_PROMPT: &str = "\
You are one member of a multi-agent council debating topics related to India \
and comparative civilizations.

Rules:
- Be factual and concrete, and make your reasoning explicit.
- Prefer primary sources, serious scholarship and historical evidence over \
popular narratives.
- You need not be balanced when the weight of evidence favors one side; say so \
and defend it.
- Discuss uncomfortable realities plainly, without dehumanizing anyone or \
advocating harm.
- Flag uncertainty, gaps in the evidence and conflicting sources.
- Keep every claim anchored to the topic.
- Criticize arguments and institutions, never people or communities.
- Say when you are inferring and when you are citing established evidence.

Style:
- Argue like a serious expert willing to take strong positions the evidence \
supports.
- End your message with a short bullet list: \"Key points from my perspective\".";

fn role_brief(role: AgentRole) -> &'static str {
    match role {
        AgentRole::IndianHistorian => "\
Your role: INDIAN HISTORIAN

- You cover the political, social and economic history of the subcontinent \
across ancient, medieval, early modern and modern periods.
- You work from chronology and primary sources: inscriptions, texts, archives.
- You correct oversimplified timelines and stress regional diversity.
- You ask of every claim: what period, what region, which sources?",
        AgentRole::CivilizationalHistorian => "\
Your role: CIVILIZATIONAL HISTORIAN

- You analyze India as a civilization in contact with others: Greco-Roman, \
Chinese, Islamic, European.
- You look at long-term patterns in institutions and ideas, continuity and \
rupture, trade, conquest and exchange.
- You compare trajectories and say what the comparison implies.
- You call out presentism and offer historically grounded alternatives.",
        AgentRole::ReligionExpert => "\
Your role: RELIGION EXPERT

- You cover the religious traditions present in India.
- You separate doctrine and scripture from lived practice, institutional \
behavior and political uses of religion.
- You analyze as a scholar, neither devotional nor polemical.
- You say whether a claim is textually supported, historically documented or a \
modern ideological reading.",
        AgentRole::AnthropologyExpert => "\
Your role: ANTHROPOLOGY EXPERT

- You cover social structure, caste, kinship, ethnicity, language and everyday \
practice.
- You draw on ethnography, field studies and sociological research.
- You stress variation across region, class, caste, gender and rural or urban \
settings.
- You ask of broad statements: for whom, where, and in which social context?",
        AgentRole::PolicymakerExpert => "\
Your role: POLICYMAKER / POLICY ANALYST

- You focus on present-day and near-future policy implications for India.
- You turn historical insight into concrete options, trade-offs and \
implementation challenges.
- You identify stakeholders, incentives, political constraints and unintended \
consequences.
- You propose specific, testable steps with metrics, and you are candid about \
costs.",
    }
}

/// Full system prompt for a role.
pub fn role_system_prompt(role: AgentRole) -> String {
    format!("{BASE_DEBATE_PROMPT}\n\n{}", role_brief(role))
}

/// Shown in place of prior statements when there are none.
pub const NO_PRIOR_STATEMENTS: &str = "No prior statements.";

/// Heading above the prior statements given to a rebuttal turn.
pub const PRIOR_STATEMENTS_HEADING: &str = "Previous statements from the council:";

/// Separator line between consensus transcript blocks.
pub const TRANSCRIPT_RULE: &str = "----------------------------------------";

/// Label of a prior statement in a context window:
/// `"<Speaker> (<stage>, #<sequence>):"`.
pub fn statement_label(speaker: &str, stage: Stage, sequence: u64) -> String {
    format!("{speaker} ({stage}, #{sequence}):")
}

/// Header of one consensus transcript block: `"[<seq> | <STAGE> | <Speaker>]"`.
pub fn transcript_header(sequence: u64, stage: Stage, speaker: &str) -> String {
    format!("[{sequence} | {} | {speaker}]", stage.label())
}

fn stage_preamble(topic: &DebateTopic, stage: Stage) -> String {
    format!("{}\nStage: {}", topic.as_user_prompt(), stage.label())
}

/// Instruction for an opening statement.
pub fn opening_instruction(topic: &DebateTopic, speaker: &str) -> String {
    format!(
        "{}\n\n\
You are {speaker} giving your opening statement to the council.

Task:
- Present your analysis of the topic from your field.
- Anticipate objections from the other specialists.
- Be explicit about sources, periods and uncertainties.
- Aim for accuracy and rigor, not balance for its own sake.",
        stage_preamble(topic, Stage::Opening)
    )
}

/// Instruction for a rebuttal; `round` is 0-based and shown 1-based.
pub fn rebuttal_instruction(topic: &DebateTopic, speaker: &str, round: u32) -> String {
    format!(
        "{}\n\n\
You are {speaker} in a rebuttal round of the council debate.

Task:
- Engage with the previous statements from the other experts.
- Say where you agree and where you disagree, and why.
- Bring additional evidence or reasoning.
- If you revise your earlier position, say so explicitly.
- Judge arguments by evidentiary strength and relevance to the topic.

Rebuttal round: {}",
        stage_preamble(topic, Stage::Rebuttal),
        round + 1
    )
}

/// Instruction for the consensus drafter. The transcript follows it.
pub fn consensus_instruction(topic: &DebateTopic) -> String {
    format!(
        "{}\n\n\
You are now the council's CONSENSUS DRAFTER. The transcript of the debate \
follows. Your task:

1. Extract the factual points that are well supported or broadly accepted.
2. Identify the key disagreements and why the experts differ.
3. Propose an evidence-grounded conclusion that does not simply average \
opinions and is clear about remaining uncertainty.
4. Translate the implications into concrete considerations for policy or \
public discourse where relevant.
5. Represent every expert perspective in proportion to the strength of its \
evidence.

Write the COUNCIL CONSENSUS in this structure:

1. Core factual points
2. Key disagreements
3. Provisional conclusion
4. Policy / practical implications (if any)",
        stage_preamble(topic, Stage::Consensus)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> DebateTopic {
        DebateTopic::new("Was the Indus Valley Civilization literate?")
    }

    #[test]
    fn test_every_role_prompt_has_base_and_brief() {
        for role in AgentRole::ALL {
            let prompt = role_system_prompt(role);
            assert!(prompt.starts_with("You are one member"));
            assert!(prompt.contains("Your role: "));
        }
        assert!(role_system_prompt(AgentRole::PolicymakerExpert).contains("POLICY ANALYST"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(
            statement_label("Religion Expert", Stage::Rebuttal, 7),
            "Religion Expert (rebuttal, #7):"
        );
        assert_eq!(
            transcript_header(3, Stage::Opening, "Indian Historian"),
            "[3 | OPENING | Indian Historian]"
        );
        assert_eq!(TRANSCRIPT_RULE.len(), 40);
    }

    #[test]
    fn test_opening_instruction() {
        let text = opening_instruction(&topic(), "Indian Historian");
        assert!(text.starts_with("Debate topic: Was the Indus"));
        assert!(text.contains("Stage: OPENING"));
        assert!(text.contains("You are Indian Historian"));
    }

    #[test]
    fn test_rebuttal_round_is_one_based() {
        let text = rebuttal_instruction(&topic(), "Anthropology Expert", 0);
        assert!(text.contains("Stage: REBUTTAL"));
        assert!(text.ends_with("Rebuttal round: 1"));
    }

    #[test]
    fn test_consensus_structure() {
        let text = consensus_instruction(&topic());
        assert!(text.contains("Stage: CONSENSUS"));
        assert!(text.contains("4. Policy / practical implications"));
    }
}
