//! Core types used throughout PropCard
//!
//! Defines scored legs and the sport/site/side enums they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Over/under side of a proposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Over,
    Under,
}

impl Default for Side {
    fn default() -> Self {
        Side::Over
    }
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Over => Side::Under,
            Side::Under => Side::Over,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "over" | "o" | "higher" => Some(Side::Over),
            "under" | "u" | "lower" => Some(Side::Under),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Over => write!(f, "over"),
            Side::Under => write!(f, "under"),
        }
    }
}

/// Supported leagues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sport {
    #[serde(alias = "nba")]
    NBA,
    #[serde(alias = "nfl")]
    NFL,
    #[serde(alias = "mlb")]
    MLB,
    #[serde(alias = "nhl")]
    NHL,
    #[serde(alias = "ncaab")]
    NCAAB,
    #[serde(alias = "ncaaf")]
    NCAAF,
    #[serde(alias = "other")]
    Other,
}

impl Default for Sport {
    fn default() -> Self {
        Sport::NBA
    }
}

impl Sport {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NBA" => Some(Sport::NBA),
            "NFL" => Some(Sport::NFL),
            "MLB" => Some(Sport::MLB),
            "NHL" => Some(Sport::NHL),
            "NCAAB" => Some(Sport::NCAAB),
            "NCAAF" => Some(Sport::NCAAF),
            "OTHER" => Some(Sport::Other),
            _ => None,
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sport::NBA => write!(f, "NBA"),
            Sport::NFL => write!(f, "NFL"),
            Sport::MLB => write!(f, "MLB"),
            Sport::NHL => write!(f, "NHL"),
            Sport::NCAAB => write!(f, "NCAAB"),
            Sport::NCAAF => write!(f, "NCAAF"),
            Sport::Other => write!(f, "OTHER"),
        }
    }
}

/// Pick'em site a leg is offered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    #[serde(alias = "PP", alias = "pp")]
    PrizePicks,
    #[serde(alias = "UD", alias = "ud")]
    Underdog,
    Sleeper,
}

impl Default for Site {
    fn default() -> Self {
        Site::PrizePicks
    }
}

impl Site {
    /// Short code used in leg ids and logs
    pub fn code(&self) -> &'static str {
        match self {
            Site::PrizePicks => "PP",
            Site::Underdog => "UD",
            Site::Sleeper => "SL",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "prizepicks" | "pp" => Some(Site::PrizePicks),
            "underdog" | "ud" => Some(Site::Underdog),
            "sleeper" | "sl" => Some(Site::Sleeper),
            _ => None,
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Site::PrizePicks => write!(f, "prizepicks"),
            Site::Underdog => write!(f, "underdog"),
            Site::Sleeper => write!(f, "sleeper"),
        }
    }
}

/// One scored proposition. Read-only once it reaches the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    /// Stable identity, e.g. `PP-12345-points-24.5`
    pub id: String,
    pub player: String,
    pub stat: String,
    pub line: f64,
    #[serde(default)]
    pub side: Side,
    /// Model-estimated probability the leg hits
    pub true_prob: f64,
    /// Ranking proxy supplied upstream; falls back to `edge()` when absent
    #[serde(default)]
    pub leg_ev: Option<f64>,
    #[serde(default)]
    pub site: Site,
    #[serde(default)]
    pub sport: Sport,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub opponent: Option<String>,
    #[serde(default)]
    pub game_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

impl Leg {
    pub fn edge(&self) -> f64 {
        self.true_prob - 0.5
    }

    /// Value used to rank legs and bound card EV during search
    pub fn ranking_ev(&self) -> f64 {
        self.leg_ev.unwrap_or_else(|| self.edge())
    }

    /// Game identity: explicit id if present, else `team_vs_opponent` with
    /// the two teams sorted so both sides of a matchup share a key.
    pub fn game_key(&self) -> Option<String> {
        if let Some(id) = self.game_id.as_deref().filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        let team = self.team.as_deref().filter(|s| !s.is_empty())?;
        let opponent = self.opponent.as_deref().filter(|s| !s.is_empty())?;
        let (a, b) = if team <= opponent {
            (team, opponent)
        } else {
            (opponent, team)
        };
        Some(format!("{}_vs_{}", a, b))
    }

    pub fn team_key(&self) -> Option<&str> {
        self.team.as_deref().filter(|s| !s.is_empty())
    }

    /// Reject legs an upstream scorer should never have produced
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.is_empty() {
            return Err(CoreError::InvalidLeg {
                leg_id: self.id.clone(),
                reason: "empty id".to_string(),
            });
        }
        if self.player.is_empty() {
            return Err(CoreError::InvalidLeg {
                leg_id: self.id.clone(),
                reason: "empty player".to_string(),
            });
        }
        if !self.true_prob.is_finite() || self.true_prob <= 0.0 || self.true_prob >= 1.0 {
            return Err(CoreError::InvalidLeg {
                leg_id: self.id.clone(),
                reason: format!("true probability {} outside (0, 1)", self.true_prob),
            });
        }
        if let Some(ev) = self.leg_ev {
            if !ev.is_finite() {
                return Err(CoreError::InvalidLeg {
                    leg_id: self.id.clone(),
                    reason: format!("leg EV {} is not finite", ev),
                });
            }
        }
        Ok(())
    }
}

/// Build the canonical `site-projection-stat-line` leg id
pub fn leg_id(site: Site, projection_id: &str, stat: &str, line: f64) -> String {
    format!("{}-{}-{}-{}", site.code(), projection_id, stat, line)
}
