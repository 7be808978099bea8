#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use powerscore::games::{Cohort, Gender, RawGame, Venue};

pub const U12_MALE: (&str, &str) = ("U12", "Male");
pub const U12_FEMALE: (&str, &str) = ("U12", "Female");
pub const U14_MALE: (&str, &str) = ("U14", "Male");

pub fn reference() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
}

/// `days` before the reference date.
pub fn ago(days: i64) -> NaiveDate {
    reference() - Duration::days(days)
}

pub fn cohort(age: u8, gender: Gender) -> Cohort {
    Cohort { age, gender }
}

#[derive(Debug, Default, Clone)]
pub struct League {
    rows: Vec<RawGame>,
    next: usize,
}

impl League {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> String {
        self.next += 1;
        format!("m{:05}", self.next)
    }

    /// Both perspective rows; the first team is at home.
    pub fn game(
        &mut self,
        date: NaiveDate,
        cohort: (&str, &str),
        home: (&str, i32),
        away: (&str, i32),
    ) -> &mut Self {
        let id = self.next_id();
        self.rows
            .extend(RawGame::perspective_pair(&id, date, cohort, home, away, Venue::Home));
        self
    }

    pub fn neutral(
        &mut self,
        date: NaiveDate,
        cohort: (&str, &str),
        first: (&str, i32),
        second: (&str, i32),
    ) -> &mut Self {
        let id = self.next_id();
        self.rows
            .extend(RawGame::perspective_pair(&id, date, cohort, first, second, Venue::Neutral));
        self
    }

    /// Only the team's own row; the opponent never appears as a team.
    pub fn one_sided(
        &mut self,
        date: NaiveDate,
        cohort: (&str, &str),
        team: (&str, i32),
        opponent: (&str, i32),
    ) -> &mut Self {
        let id = self.next_id();
        let [row, _] = RawGame::perspective_pair(&id, date, cohort, team, opponent, Venue::Neutral);
        self.rows.push(row);
        self
    }

    /// Cross-age fixture: each side's row carries its own cohort.
    pub fn cross_age(
        &mut self,
        date: NaiveDate,
        first: ((&str, &str), (&str, i32)),
        second: ((&str, &str), (&str, i32)),
    ) -> &mut Self {
        let id = self.next_id();
        let [a, _] =
            RawGame::perspective_pair(&id, date, first.0, first.1, second.1, Venue::Neutral);
        let [_, b] =
            RawGame::perspective_pair(&id, date, second.0, first.1, second.1, Venue::Neutral);
        self.rows.push(a);
        self.rows.push(b);
        self
    }

    /// Every pair meets `rounds` times; goals follow a planted strength
    /// ladder (`teams[0]` weakest) plus seeded noise.
    pub fn round_robin(
        &mut self,
        cohort: (&str, &str),
        teams: &[String],
        rounds: usize,
        seed: u64,
    ) -> &mut Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = teams.len().max(2);
        let mut slot = 0i64;
        for round in 0..rounds {
            for i in 0..teams.len() {
                for j in (i + 1)..teams.len() {
                    let gap = (j as f64 - i as f64) / (n - 1) as f64;
                    let noise_a: f64 = rng.gen_range(-1.2..1.2);
                    let noise_b: f64 = rng.gen_range(-1.2..1.2);
                    let goals_i = (1.2 - 1.0 * gap + noise_a).round().max(0.0) as i32;
                    let goals_j = (1.2 + 1.5 * gap + noise_b).round().max(0.0) as i32;
                    slot += 1;
                    let date = ago(1 + (slot * 3) % 330);
                    let (home, away) = if (i + j + round) % 2 == 0 {
                        ((teams[i].as_str(), goals_i), (teams[j].as_str(), goals_j))
                    } else {
                        ((teams[j].as_str(), goals_j), (teams[i].as_str(), goals_i))
                    };
                    self.game(date, cohort, home, away);
                }
            }
        }
        self
    }

    pub fn rows(&self) -> Vec<RawGame> {
        self.rows.clone()
    }
}

pub fn team_names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i:02}")).collect()
}
