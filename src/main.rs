use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate};
use tracing_subscriber::EnvFilter;

use powerscore::cache::ResultCache;
use powerscore::config::RankingConfig;
use powerscore::engine::{self, RankingRun};
use powerscore::export;
use powerscore::games::{self, IdentityMap, IdentityResolver, Passthrough};

const USAGE: &str = "usage: powerscore --games <games.json> [--config <config.json>] \
[--identity <identity.json>] [--as-of YYYY-MM-DD] [--out <run.json>] [--xlsx <run.xlsx>] \
[--top N] [--no-cache]";

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_logging();

    if has_flag("--help") || has_flag("-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let games_path = parse_path_arg("--games").ok_or_else(|| anyhow!("missing --games\n{USAGE}"))?;
    let cfg = RankingConfig::resolve(parse_path_arg("--config").as_deref())?;
    let as_of = match parse_str_arg("--as-of") {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid --as-of {raw}"))?,
        None => Local::now().date_naive(),
    };
    let top = parse_str_arg("--top")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(10);

    let identity = parse_path_arg("--identity")
        .map(|path| IdentityMap::load(&path))
        .transpose()?;
    let resolver: &dyn IdentityResolver = match identity.as_ref() {
        Some(map) => map,
        None => &Passthrough,
    };

    let raw = games::load_raw_games(&games_path)?;
    let cache = if has_flag("--no-cache") {
        None
    } else {
        ResultCache::default_location()
    };
    let run = match cache.as_ref() {
        Some(cache) => engine::rank_cached(&raw, as_of, &cfg, resolver, cache)?,
        None => engine::rank(&raw, as_of, &cfg, resolver)?,
    };

    print_summary(&run, top);

    if let Some(out) = parse_path_arg("--out") {
        export::write_json(&run, &out)?;
        println!("Wrote {}", out.display());
    }
    if let Some(xlsx) = parse_path_arg("--xlsx") {
        export::write_xlsx(&run, &xlsx)?;
        println!("Wrote {}", xlsx.display());
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn print_summary(run: &RankingRun, top: usize) {
    println!("PowerScore rankings as of {}", run.reference_date);
    println!("Cache key: {}", run.cache_key.combined());
    if run.rejected.total() > 0 {
        println!("Rejected rows: {} ({:?})", run.rejected.total(), run.rejected);
    }
    for report in &run.cohorts {
        println!();
        if let Some(err) = &report.error {
            println!("{}: {err}", report.cohort);
            continue;
        }
        let ml = if report.ml.available {
            "ml on".to_string()
        } else {
            match &report.ml.reason {
                Some(reason) => format!("ml off: {reason}"),
                None => "ml off".to_string(),
            }
        };
        println!(
            "{}  ranked={} unranked={} games={} sos_iters={} {}",
            report.cohort,
            report.teams.len(),
            report.unranked.len(),
            report.window.games_in_window,
            report.sos_iterations_run,
            ml
        );
        println!(
            "{:>4}  {:<24} {:>5} {:>8} {:>8} {:>8}  status",
            "rank", "team", "gp", "sos", "adj", "final"
        );
        for t in report.teams.iter().take(top) {
            println!(
                "{:>4}  {:<24} {:>5} {:>8.4} {:>8.4} {:>8.4}  {}",
                t.rank_in_cohort.map(|r| r.to_string()).unwrap_or_default(),
                t.team_id,
                t.games_played,
                t.sos_norm,
                t.powerscore_adj,
                t.power_score_final,
                t.status.label()
            );
        }
    }
}

fn parse_str_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.clone());
        }
    }
    None
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_str_arg(name).map(|raw| PathBuf::from(raw.trim()))
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
