use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const MIN_AGE: u8 = 6;
const MAX_AGE: u8 = 23;
const MAX_ALIAS_HOPS: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Home,
    Away,
    #[default]
    Neutral,
}

impl Venue {
    /// Home/away indicator consumed by the residual model.
    pub fn indicator(self) -> f64 {
        match self {
            Venue::Home => 1.0,
            Venue::Away => -1.0,
            Venue::Neutral => 0.0,
        }
    }

    fn mirrored(self) -> Self {
        match self {
            Venue::Home => Venue::Away,
            Venue::Away => Venue::Home,
            Venue::Neutral => Venue::Neutral,
        }
    }
}

/// One side's view of a match, exactly as supplied upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGame {
    pub match_id: String,
    pub date: NaiveDate,
    pub team_id: String,
    pub opponent_id: String,
    pub age_group: String,
    pub gender: String,
    pub goals_for: Option<i32>,
    pub goals_against: Option<i32>,
    #[serde(default)]
    pub venue: Venue,
}

impl RawGame {
    /// Both perspective rows of one match; `home` is the first team's venue.
    pub fn perspective_pair(
        match_id: &str,
        date: NaiveDate,
        cohort: (&str, &str),
        first: (&str, i32),
        second: (&str, i32),
        home: Venue,
    ) -> [RawGame; 2] {
        let (age_group, gender) = cohort;
        [
            RawGame {
                match_id: match_id.to_string(),
                date,
                team_id: first.0.to_string(),
                opponent_id: second.0.to_string(),
                age_group: age_group.to_string(),
                gender: gender.to_string(),
                goals_for: Some(first.1),
                goals_against: Some(second.1),
                venue: home,
            },
            RawGame {
                match_id: match_id.to_string(),
                date,
                team_id: second.0.to_string(),
                opponent_id: first.0.to_string(),
                age_group: age_group.to_string(),
                gender: gender.to_string(),
                goals_for: Some(second.1),
                goals_against: Some(first.1),
                venue: home.mirrored(),
            },
        ]
    }
}

pub fn load_raw_games(path: &Path) -> Result<Vec<RawGame>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read games {}", path.display()))?;
    serde_json::from_str::<Vec<RawGame>>(&raw)
        .with_context(|| format!("parse games {}", path.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" | "m" | "boys" | "b" => Some(Gender::Male),
            "female" | "f" | "girls" | "g" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Partition key: normalization and ranking never cross it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cohort {
    pub age: u8,
    pub gender: Gender,
}

impl Cohort {
    pub fn parse(age_group: &str, gender: &str) -> Option<Self> {
        Some(Cohort {
            age: parse_age_group(age_group)?,
            gender: Gender::parse(gender)?,
        })
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{} {:?}", self.age, self.gender)
    }
}

fn parse_age_group(raw: &str) -> Option<u8> {
    let s = raw.trim();
    let s = s
        .strip_prefix('U')
        .or_else(|| s.strip_prefix('u'))
        .unwrap_or(s);
    let s = s.strip_prefix('-').unwrap_or(s);
    let age = s.parse::<u8>().ok()?;
    (MIN_AGE..=MAX_AGE).contains(&age).then_some(age)
}

/// Canonical team identifier. Only [`ingest`] mints these, after resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TeamId(String);

impl TeamId {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        TeamId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated perspective row; every identifier has been through the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGame {
    pub match_id: String,
    pub date: NaiveDate,
    pub team: TeamId,
    pub opponent: TeamId,
    pub cohort: Cohort,
    pub goals_for: u32,
    pub goals_against: u32,
    pub venue: Venue,
}

impl ResolvedGame {
    pub fn goal_diff(&self) -> i32 {
        self.goals_for as i32 - self.goals_against as i32
    }
}

/// The external identity service, reduced to one pure function plus a version.
pub trait IdentityResolver: Sync {
    fn resolve(&self, id: &str) -> Option<String>;

    /// Changes whenever the mapping changes (e.g. after a team merge).
    fn mapping_version(&self) -> String;
}

/// Accepts any non-empty identifier unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl IdentityResolver for Passthrough {
    fn resolve(&self, id: &str) -> Option<String> {
        (!id.trim().is_empty()).then(|| id.to_string())
    }

    fn mapping_version(&self) -> String {
        "passthrough".to_string()
    }
}

/// Alias table produced by the identity service.
///
/// Aliases are followed transitively (merges of merges). When `known` is
/// non-empty, anything that does not end in a known id is unresolved;
/// otherwise unknown ids resolve to themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityMap {
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub known: BTreeSet<String>,
}

impl IdentityMap {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read identity map {}", path.display()))?;
        serde_json::from_str::<IdentityMap>(&raw)
            .with_context(|| format!("parse identity map {}", path.display()))
    }
}

impl IdentityResolver for IdentityMap {
    fn resolve(&self, id: &str) -> Option<String> {
        if id.trim().is_empty() {
            return None;
        }
        let mut current = id;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.aliases.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        if self.aliases.get(current).is_some_and(|next| next != current) {
            // alias cycle
            return None;
        }
        if self.known.is_empty() || self.known.contains(current) {
            Some(current.to_string())
        } else {
            None
        }
    }

    fn mapping_version(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(json.as_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingScore,
    NegativeScore,
    UnresolvedIdentity,
    InvalidCohort,
    SelfMatch,
    Duplicate,
    MirrorMismatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectCounts {
    pub missing_score: usize,
    pub negative_score: usize,
    pub unresolved_identity: usize,
    pub invalid_cohort: usize,
    pub self_match: usize,
    pub duplicate: usize,
    pub mirror_mismatch: usize,
}

impl RejectCounts {
    pub fn record(&mut self, reason: RejectReason) {
        let slot = match reason {
            RejectReason::MissingScore => &mut self.missing_score,
            RejectReason::NegativeScore => &mut self.negative_score,
            RejectReason::UnresolvedIdentity => &mut self.unresolved_identity,
            RejectReason::InvalidCohort => &mut self.invalid_cohort,
            RejectReason::SelfMatch => &mut self.self_match,
            RejectReason::Duplicate => &mut self.duplicate,
            RejectReason::MirrorMismatch => &mut self.mirror_mismatch,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.missing_score
            + self.negative_score
            + self.unresolved_identity
            + self.invalid_cohort
            + self.self_match
            + self.duplicate
            + self.mirror_mismatch
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub games: Vec<ResolvedGame>,
    pub rejected: RejectCounts,
}

/// Validate rows and resolve every team/opponent reference exactly once.
pub fn ingest(rows: &[RawGame], resolver: &dyn IdentityResolver) -> Ingested {
    let mut rejected = RejectCounts::default();
    let mut accepted: Vec<ResolvedGame> = Vec::with_capacity(rows.len());

    for row in rows {
        match validate_row(row, resolver) {
            Ok(game) => accepted.push(game),
            Err(reason) => rejected.record(reason),
        }
    }

    // Group both perspectives of each match by (match_id, team pair).
    let mut groups: BTreeMap<(String, TeamId, TeamId), Vec<usize>> = BTreeMap::new();
    for (idx, g) in accepted.iter().enumerate() {
        let (lo, hi) = if g.team <= g.opponent {
            (g.team.clone(), g.opponent.clone())
        } else {
            (g.opponent.clone(), g.team.clone())
        };
        groups.entry((g.match_id.clone(), lo, hi)).or_default().push(idx);
    }

    let mut drop = vec![false; accepted.len()];
    for idxs in groups.values() {
        let mut seen_sides: BTreeSet<&TeamId> = BTreeSet::new();
        let mut kept: Vec<usize> = Vec::with_capacity(2);
        for &idx in idxs {
            if seen_sides.insert(&accepted[idx].team) {
                kept.push(idx);
            } else {
                drop[idx] = true;
                rejected.record(RejectReason::Duplicate);
            }
        }
        if let [a, b] = kept[..] {
            let (ga, gb) = (&accepted[a], &accepted[b]);
            if ga.goals_for != gb.goals_against || ga.goals_against != gb.goals_for {
                drop[a] = true;
                drop[b] = true;
                rejected.record(RejectReason::MirrorMismatch);
                rejected.record(RejectReason::MirrorMismatch);
            }
        }
    }

    let games = accepted
        .into_iter()
        .zip(drop)
        .filter_map(|(g, dropped)| (!dropped).then_some(g))
        .collect();
    Ingested { games, rejected }
}

fn validate_row(
    row: &RawGame,
    resolver: &dyn IdentityResolver,
) -> Result<ResolvedGame, RejectReason> {
    let (Some(gf), Some(ga)) = (row.goals_for, row.goals_against) else {
        return Err(RejectReason::MissingScore);
    };
    if gf < 0 || ga < 0 {
        return Err(RejectReason::NegativeScore);
    }
    let cohort = Cohort::parse(&row.age_group, &row.gender).ok_or(RejectReason::InvalidCohort)?;
    let team = resolver
        .resolve(&row.team_id)
        .ok_or(RejectReason::UnresolvedIdentity)?;
    let opponent = resolver
        .resolve(&row.opponent_id)
        .ok_or(RejectReason::UnresolvedIdentity)?;
    if team == opponent {
        return Err(RejectReason::SelfMatch);
    }
    Ok(ResolvedGame {
        match_id: row.match_id.clone(),
        date: row.date,
        team: TeamId::new(team),
        opponent: TeamId::new(opponent),
        cohort,
        goals_for: gf as u32,
        goals_against: ga as u32,
        venue: row.venue,
    })
}
