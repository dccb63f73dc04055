// =============================================================================
// Shared domain types used across the prediction tournament engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A directional forecast. Also doubles as a verdict/outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn from_delta_pct(delta_pct: f64, flat_threshold_pct: f64) -> Self {
        if delta_pct.abs() < flat_threshold_pct {
            Direction::Flat
        } else if delta_pct > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Flat => "FLAT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Direction::Up),
            "DOWN" => Ok(Direction::Down),
            "FLAT" => Ok(Direction::Flat),
            _ => Err(()),
        }
    }
}

/// Round lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Betting,
    Locked,
    Settled,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoundStatus::Betting => "betting",
            RoundStatus::Locked => "locked",
            RoundStatus::Settled => "settled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RoundStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "betting" => Ok(RoundStatus::Betting),
            "locked" => Ok(RoundStatus::Locked),
            "settled" => Ok(RoundStatus::Settled),
            _ => Err(()),
        }
    }
}

/// Agent claim lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    PendingClaim,
    Active,
    Inactive,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::PendingClaim => "pending_claim",
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_claim" => Ok(AgentStatus::PendingClaim),
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            _ => Err(()),
        }
    }
}

/// FlipCard display result — WIN or FAIL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlipResult {
    Win,
    Fail,
}

impl std::fmt::Display for FlipResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", if matches!(self, FlipResult::Win) { "WIN" } else { "FAIL" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn direction_from_delta_respects_flat_threshold() {
        assert_eq!(Direction::from_delta_pct(0.1, 0.2), Direction::Flat);
        assert_eq!(Direction::from_delta_pct(-0.1, 0.2), Direction::Flat);
        assert_eq!(Direction::from_delta_pct(0.5, 0.2), Direction::Up);
        assert_eq!(Direction::from_delta_pct(-0.5, 0.2), Direction::Down);
    }

    #[test]
    fn direction_roundtrip_str() {
        assert_eq!(Direction::from_str("up").unwrap(), Direction::Up);
        assert_eq!(Direction::from_str("DOWN").unwrap(), Direction::Down);
        assert!(Direction::from_str("sideways").is_err());
    }

    #[test]
    fn round_status_roundtrip() {
        assert_eq!(RoundStatus::from_str("betting").unwrap(), RoundStatus::Betting);
        assert_eq!(RoundStatus::Locked.to_string(), "locked");
    }
}
