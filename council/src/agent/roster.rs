//! Roster: the fixed, ordered set of agents in a session.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Agent, AgentRole};
use crate::config::CouncilConfig;
use crate::errors::ConfigurationError;

/// Validated agent roster: at least one expert, exactly one consensus
/// agent, no role twice. Order is the speaking order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Agent>", into = "Vec<Agent>")]
pub struct Roster {
    agents: Vec<Agent>,
    consensus: usize,
}

impl Roster {
    /// Validate and build a roster.
    pub fn new(agents: Vec<Agent>) -> Result<Self, ConfigurationError> {
        if agents.is_empty() {
            return Err(ConfigurationError::EmptyRoster);
        }

        let mut seen = Vec::with_capacity(agents.len());
        for agent in &agents {
            if seen.contains(&agent.role) {
                return Err(ConfigurationError::DuplicateRole(agent.role));
            }
            seen.push(agent.role);
        }

        let mut consensus = agents
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_consensus())
            .map(|(i, _)| i);
        let index = consensus
            .next()
            .ok_or(ConfigurationError::MissingConsensusAgent)?;
        if consensus.next().is_some() {
            return Err(ConfigurationError::MultipleConsensusAgents);
        }
        if agents.len() == 1 {
            return Err(ConfigurationError::NoDebaters);
        }

        Ok(Self {
            agents,
            consensus: index,
        })
    }

    /// Build the council from configuration, resolving each role's model
    /// alias with fallback to the default alias.
    pub fn from_config(config: &CouncilConfig) -> Result<Self, ConfigurationError> {
        let default_alias = &config.default_model_alias;
        let default_model = config.model(default_alias)?;

        let mut agents = Vec::with_capacity(config.council_roles.len());
        for &role in &config.council_roles {
            let model = match config.role_models.get(role.as_str()) {
                Some(alias) => match config.models.get(alias) {
                    Some(model) => model,
                    None => {
                        warn!(
                            role = %role,
                            alias = %alias,
                            fallback = %default_alias,
                            "Unknown model alias for role, using default"
                        );
                        default_model
                    }
                },
                None => default_model,
            };
            agents.push(Agent::new(role, model.name.clone()).with_options(model.options()));
        }

        Self::new(agents)
    }

    /// All agents in roster order.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Expert agents in speaking order (the consensus agent excluded).
    pub fn debaters(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter().filter(|a| !a.is_consensus())
    }

    /// The single consensus agent.
    pub fn consensus_agent(&self) -> &Agent {
        &self.agents[self.consensus]
    }

    pub fn get(&self, role: AgentRole) -> Option<&Agent> {
        self.agents.iter().find(|a| a.role == role)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl TryFrom<Vec<Agent>> for Roster {
    type Error = ConfigurationError;

    fn try_from(agents: Vec<Agent>) -> Result<Self, Self::Error> {
        Self::new(agents)
    }
}

impl From<Roster> for Vec<Agent> {
    fn from(roster: Roster) -> Self {
        roster.agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    fn agent(role: AgentRole) -> Agent {
        Agent::new(role, "m")
    }

    #[test]
    fn test_valid_roster_order() {
        let roster = Roster::new(vec![
            agent(AgentRole::ReligionExpert),
            agent(AgentRole::PolicymakerExpert),
            agent(AgentRole::IndianHistorian),
        ])
        .unwrap();
        let order: Vec<_> = roster.debaters().map(|a| a.role).collect();
        assert_eq!(order, vec![AgentRole::ReligionExpert, AgentRole::IndianHistorian]);
        assert_eq!(roster.consensus_agent().role, AgentRole::PolicymakerExpert);
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn test_empty_roster() {
        assert_eq!(Roster::new(vec![]), Err(ConfigurationError::EmptyRoster));
    }

    #[test]
    fn test_missing_consensus() {
        let err = Roster::new(vec![agent(AgentRole::IndianHistorian)]).unwrap_err();
        assert_eq!(err, ConfigurationError::MissingConsensusAgent);
    }

    #[test]
    fn test_consensus_only() {
        let err = Roster::new(vec![agent(AgentRole::PolicymakerExpert)]).unwrap_err();
        assert_eq!(err, ConfigurationError::NoDebaters);
    }

    #[test]
    fn test_duplicate_role() {
        let err = Roster::new(vec![
            agent(AgentRole::IndianHistorian),
            agent(AgentRole::IndianHistorian),
            agent(AgentRole::PolicymakerExpert),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateRole(AgentRole::IndianHistorian));
    }

    #[test]
    fn test_from_default_config() {
        let config = CouncilConfig::default();
        let roster = Roster::from_config(&config).unwrap();
        assert_eq!(roster.len(), 5);
        assert_eq!(roster.debaters().count(), 4);
        assert!(roster.agents().iter().all(|a| a.model == "gpt-oss:latest"));
        assert_eq!(roster.agents()[0].options.max_tokens, 1024);
    }

    #[test]
    fn test_from_config_role_model_and_fallback() {
        let mut config = CouncilConfig::default();
        config.models.insert(
            "small".into(),
            ModelConfig {
                name: "llama3:8b".into(),
                max_completion_tokens: 256,
                temperature: 0.7,
                top_p: 0.9,
            },
        );
        config
            .role_models
            .insert("religion_expert".into(), "small".into());
        config
            .role_models
            .insert("indian_historian".into(), "missing".into());

        let roster = Roster::from_config(&config).unwrap();
        let religion = roster.get(AgentRole::ReligionExpert).unwrap();
        assert_eq!(religion.model, "llama3:8b");
        assert_eq!(religion.options.max_tokens, 256);
        let historian = roster.get(AgentRole::IndianHistorian).unwrap();
        assert_eq!(historian.model, "gpt-oss:latest");
    }

    #[test]
    fn test_from_config_unknown_default_alias() {
        let config = CouncilConfig {
            default_model_alias: "nope".into(),
            ..CouncilConfig::default()
        };
        assert!(matches!(
            Roster::from_config(&config),
            Err(ConfigurationError::UnknownModelAlias { .. })
        ));
    }

    #[test]
    fn test_serde_revalidates() {
        let json = serde_json::to_string(&vec![agent(AgentRole::IndianHistorian)]).unwrap();
        assert!(serde_json::from_str::<Roster>(&json).is_err());

        let roster = Roster::new(vec![
            agent(AgentRole::IndianHistorian),
            agent(AgentRole::PolicymakerExpert),
        ])
        .unwrap();
        let json = serde_json::to_string(&roster).unwrap();
        let back: Roster = serde_json::from_str(&json).unwrap();
        assert_eq!(back, roster);
    }
}
