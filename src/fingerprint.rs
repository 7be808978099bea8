use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RankingConfig;
use crate::games::{IdentityResolver, RawGame, Venue};

/// Three independently versioned parts plus the reference date. Any one
/// changing invalidates cached output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub games: String,
    pub config: String,
    pub identity: String,
    pub reference_date: NaiveDate,
}

impl CacheKey {
    pub fn combined(&self) -> String {
        let line = format!(
            "{}|{}|{}|{}",
            self.games, self.config, self.identity, self.reference_date
        );
        format!("{:x}", Sha256::digest(line.as_bytes()))
    }
}

pub fn cache_key(
    raw: &[RawGame],
    cfg: &RankingConfig,
    resolver: &dyn IdentityResolver,
    reference_date: NaiveDate,
) -> CacheKey {
    CacheKey {
        games: games_fingerprint(raw),
        config: cfg.config_version(),
        identity: resolver.mapping_version(),
        reference_date,
    }
}

/// Order-insensitive digest of the supplied rows.
pub fn games_fingerprint(raw: &[RawGame]) -> String {
    let mut lines: Vec<String> = raw.iter().map(canonical_line).collect();
    lines.sort();
    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn canonical_line(g: &RawGame) -> String {
    let score = |v: Option<i32>| v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string());
    let venue = match g.venue {
        Venue::Home => "H",
        Venue::Away => "A",
        Venue::Neutral => "N",
    };
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        g.match_id,
        g.date,
        g.team_id,
        g.opponent_id,
        g.age_group.trim(),
        g.gender.trim(),
        score(g.goals_for),
        score(g.goals_against),
        venue
    )
}
