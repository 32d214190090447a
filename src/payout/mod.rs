//! Payout ladders and the distribution math that prices them
//!
//! A ladder maps hit counts to payout multipliers. The built-in table covers
//! PrizePicks Power/Flex and Underdog Standard/Flex; a YAML table can replace it.

pub mod distribution;
pub mod ev;

pub use distribution::{binomial_distribution, binomial_pmf, hit_distribution, HitDistribution};
pub use ev::{breakeven_probability, ev_from_distribution, CardEvQuote};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::types::Site;

/// Structure identifier such as `5F` or `UD_6F_FLX`. Always upper-case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StructureId(String);

impl StructureId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for StructureId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for StructureId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<StructureId> for String {
    fn from(id: StructureId) -> Self {
        id.0
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All-or-nothing vs. partial-credit ladders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    #[serde(alias = "standard")]
    Power,
    Flex,
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureKind::Power => write!(f, "power"),
            StructureKind::Flex => write!(f, "flex"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutLadder {
    pub id: StructureId,
    pub site: Site,
    pub kind: StructureKind,
    pub picks: usize,
    /// Hits -> multiplier. Missing tiers pay nothing.
    pub payouts: BTreeMap<usize, f64>,
    #[serde(default)]
    pub display_name: String,
}

impl PayoutLadder {
    pub fn new(
        id: impl Into<StructureId>,
        site: Site,
        kind: StructureKind,
        picks: usize,
        tiers: &[(usize, f64)],
    ) -> CoreResult<Self> {
        let ladder = Self::fixed(id, site, kind, picks, tiers);
        ladder.validate()?;
        Ok(ladder)
    }

    fn fixed(
        id: impl Into<StructureId>,
        site: Site,
        kind: StructureKind,
        picks: usize,
        tiers: &[(usize, f64)],
    ) -> Self {
        let id = id.into();
        let kind_name = match kind {
            StructureKind::Power => "Power",
            StructureKind::Flex => "Flex",
        };
        Self {
            display_name: format!("{} {}-Pick {}", site.code(), picks, kind_name),
            id,
            site,
            kind,
            picks,
            payouts: tiers.iter().copied().collect(),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        let malformed = |reason: String| CoreError::MalformedLadder {
            structure: self.id.to_string(),
            reason,
        };

        if self.picks == 0 {
            return Err(malformed("pick count must be at least 1".to_string()));
        }
        for (&hits, &mult) in &self.payouts {
            if hits > self.picks {
                return Err(malformed(format!(
                    "tier at {} hits exceeds {} picks",
                    hits, self.picks
                )));
            }
            if !mult.is_finite() || mult < 0.0 {
                return Err(malformed(format!(
                    "multiplier {} at {} hits must be finite and non-negative",
                    mult, hits
                )));
            }
        }
        if self.max_multiplier() <= 0.0 {
            return Err(malformed("ladder never pays".to_string()));
        }
        Ok(())
    }

    pub fn multiplier(&self, hits: usize) -> f64 {
        self.payouts.get(&hits).copied().unwrap_or(0.0)
    }

    pub fn max_multiplier(&self) -> f64 {
        self.payouts.values().copied().fold(0.0, f64::max)
    }

    /// Dense multiplier vector indexed by hit count, length `picks + 1`
    pub fn multipliers(&self) -> Vec<f64> {
        (0..=self.picks).map(|k| self.multiplier(k)).collect()
    }
}

/// Static set of ladders, keyed by structure id. Built once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoutTable {
    ladders: BTreeMap<StructureId, PayoutLadder>,
}

impl PayoutTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// PrizePicks and Underdog ladders
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for ladder in prizepicks_ladders().into_iter().chain(underdog_ladders()) {
            table.ladders.insert(ladder.id.clone(), ladder);
        }
        table
    }

    pub fn from_ladders(ladders: impl IntoIterator<Item = PayoutLadder>) -> CoreResult<Self> {
        let mut table = Self::empty();
        for ladder in ladders {
            table.insert(ladder)?;
        }
        Ok(table)
    }

    /// Parse a YAML list of ladders, validating each one
    pub fn from_yaml_str(yaml: &str) -> CoreResult<Self> {
        let ladders: Vec<PayoutLadder> =
            serde_yaml::from_str(yaml).map_err(|e| CoreError::PayoutParse(e.to_string()))?;
        Self::from_ladders(ladders)
    }

    pub fn insert(&mut self, ladder: PayoutLadder) -> CoreResult<()> {
        ladder.validate()?;
        if self.ladders.contains_key(&ladder.id) {
            return Err(CoreError::MalformedLadder {
                structure: ladder.id.to_string(),
                reason: "duplicate structure id".to_string(),
            });
        }
        self.ladders.insert(ladder.id.clone(), ladder);
        Ok(())
    }

    pub fn get(&self, id: &StructureId) -> CoreResult<&PayoutLadder> {
        self.ladders
            .get(id)
            .ok_or_else(|| CoreError::UnknownStructure(id.clone()))
    }

    /// Sibling ladder lookup, e.g. the 4-pick flex that a trimmed 5-pick flex becomes
    pub fn find(&self, site: Site, kind: StructureKind, picks: usize) -> Option<&PayoutLadder> {
        self.ladders
            .values()
            .find(|l| l.site == site && l.kind == kind && l.picks == picks)
    }

    pub fn for_site(&self, site: Site) -> impl Iterator<Item = &PayoutLadder> {
        self.ladders.values().filter(move |l| l.site == site)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PayoutLadder> {
        self.ladders.values()
    }

    pub fn len(&self) -> usize {
        self.ladders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ladders.is_empty()
    }
}

fn prizepicks_ladders() -> Vec<PayoutLadder> {
    use StructureKind::{Flex, Power};
    let pp = Site::PrizePicks;
    vec![
        PayoutLadder::fixed("2P", pp, Power, 2, &[(2, 3.0)]),
        PayoutLadder::fixed("3P", pp, Power, 3, &[(3, 6.0)]),
        PayoutLadder::fixed("4P", pp, Power, 4, &[(4, 10.0)]),
        PayoutLadder::fixed("5P", pp, Power, 5, &[(5, 20.0)]),
        PayoutLadder::fixed("6P", pp, Power, 6, &[(6, 37.5)]),
        PayoutLadder::fixed("3F", pp, Flex, 3, &[(3, 3.0), (2, 1.0)]),
        PayoutLadder::fixed("4F", pp, Flex, 4, &[(4, 6.0), (3, 1.5)]),
        PayoutLadder::fixed("5F", pp, Flex, 5, &[(5, 10.0), (4, 2.0), (3, 0.4)]),
        PayoutLadder::fixed("6F", pp, Flex, 6, &[(6, 25.0), (5, 2.0), (4, 0.4)]),
    ]
}

fn underdog_ladders() -> Vec<PayoutLadder> {
    use StructureKind::{Flex, Power};
    let ud = Site::Underdog;
    vec![
        PayoutLadder::fixed("UD_2P_STD", ud, Power, 2, &[(2, 3.0)]),
        PayoutLadder::fixed("UD_3P_STD", ud, Power, 3, &[(3, 6.0)]),
        PayoutLadder::fixed("UD_4P_STD", ud, Power, 4, &[(4, 10.0)]),
        PayoutLadder::fixed("UD_5P_STD", ud, Power, 5, &[(5, 20.0)]),
        PayoutLadder::fixed("UD_6P_STD", ud, Power, 6, &[(6, 35.0)]),
        PayoutLadder::fixed("UD_3F_FLX", ud, Flex, 3, &[(3, 3.0), (2, 1.0)]),
        PayoutLadder::fixed("UD_4F_FLX", ud, Flex, 4, &[(4, 6.0), (3, 1.5)]),
        PayoutLadder::fixed("UD_5F_FLX", ud, Flex, 5, &[(5, 10.0), (4, 2.5)]),
        PayoutLadder::fixed("UD_6F_FLX", ud, Flex, 6, &[(6, 25.0), (5, 2.6), (4, 0.25)]),
        PayoutLadder::fixed("UD_7F_FLX", ud, Flex, 7, &[(7, 40.0), (6, 2.75), (5, 0.5)]),
        PayoutLadder::fixed("UD_8F_FLX", ud, Flex, 8, &[(8, 80.0), (7, 3.0), (6, 1.0)]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ladders_are_valid() {
        let table = PayoutTable::builtin();
        assert_eq!(table.len(), 20);
        for ladder in table.iter() {
            assert!(ladder.validate().is_ok(), "{} failed validation", ladder.id);
            assert_eq!(ladder.multipliers().len(), ladder.picks + 1);
        }
    }

    #[test]
    fn missing_tier_pays_zero() {
        let table = PayoutTable::builtin();
        let five_flex = table.get(&StructureId::new("5f")).unwrap();
        assert_eq!(five_flex.multiplier(5), 10.0);
        assert_eq!(five_flex.multiplier(2), 0.0);
        assert_eq!(five_flex.multiplier(9), 0.0);
        assert_eq!(five_flex.max_multiplier(), 10.0);
    }

    #[test]
    fn find_sibling_by_site_kind_and_size() {
        let table = PayoutTable::builtin();
        let sibling = table.find(Site::Underdog, StructureKind::Flex, 4).unwrap();
        assert_eq!(sibling.id.as_str(), "UD_4F_FLX");
        assert!(table.find(Site::PrizePicks, StructureKind::Flex, 8).is_none());
    }

    #[test]
    fn malformed_ladders_fail_loudly() {
        let tier_past_picks =
            PayoutLadder::new("BAD", Site::PrizePicks, StructureKind::Power, 2, &[(3, 5.0)]);
        assert!(matches!(
            tier_past_picks,
            Err(CoreError::MalformedLadder { .. })
        ));

        let negative =
            PayoutLadder::new("BAD", Site::PrizePicks, StructureKind::Flex, 3, &[(3, -1.0)]);
        assert!(negative.is_err());

        let never_pays = PayoutLadder::new("BAD", Site::PrizePicks, StructureKind::Power, 2, &[]);
        assert!(never_pays.is_err());
    }

    #[test]
    fn unknown_structure_is_an_error() {
        let table = PayoutTable::builtin();
        let err = table.get(&StructureId::new("9P")).unwrap_err();
        assert_eq!(err, CoreError::UnknownStructure(StructureId::new("9P")));
    }

    #[test]
    fn yaml_table_round_trips_through_validation() {
        let yaml = r#"
- id: 3f
  site: prizepicks
  kind: flex
  picks: 3
  payouts: { 3: 2.25, 2: 1.25 }
- id: 2p
  site: prizepicks
  kind: power
  picks: 2
  payouts: { 2: 3.0 }
"#;
        let table = PayoutTable::from_yaml_str(yaml).unwrap();
        assert_eq!(table.len(), 2);
        let three = table.get(&StructureId::new("3F")).unwrap();
        assert_eq!(three.multiplier(2), 1.25);

        let bad = "- id: 2p\n  site: prizepicks\n  kind: power\n  picks: 2\n  payouts: { 4: 3.0 }\n";
        assert!(PayoutTable::from_yaml_str(bad).is_err());
        assert!(matches!(
            PayoutTable::from_yaml_str("not: [a, list"),
            Err(CoreError::PayoutParse(_))
        ));
    }
}
