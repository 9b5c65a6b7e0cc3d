use serde::{Deserialize, Serialize};
use std::fmt;

/// Step within a consensus round. Steps only move forward within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoundStep {
    NewHeight,
    NewRound,
    Propose,
    Prevote,
    PrevoteWait,
    Precommit,
    PrecommitWait,
    Commit,
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStep::NewHeight => "NewHeight",
            RoundStep::NewRound => "NewRound",
            RoundStep::Propose => "Propose",
            RoundStep::Prevote => "Prevote",
            RoundStep::PrevoteWait => "PrevoteWait",
            RoundStep::Precommit => "Precommit",
            RoundStep::PrecommitWait => "PrecommitWait",
            RoundStep::Commit => "Commit",
        };
        f.write_str(name)
    }
}
