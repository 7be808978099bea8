use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::engine::{CohortReport, RankingRun, global_ranking};
use crate::powerscore::TeamRanking;

const TEAM_HEADER: [&str; 29] = [
    "rank",
    "team_id",
    "cohort",
    "status",
    "games_played",
    "last_game",
    "off_raw",
    "def_raw",
    "off_norm",
    "def_norm",
    "metric_outlier",
    "abs_strength",
    "sos",
    "sos_adj",
    "sos_norm",
    "bridge_count",
    "connectivity_factor",
    "perf_raw",
    "perf_centered",
    "powerscore_core",
    "provisional_mult",
    "powerscore_adj",
    "ml_residual",
    "ml_norm",
    "ml_scale",
    "ml_delta",
    "powerscore_blended",
    "power_score_final",
    "global_rank",
];

enum Cell {
    Text(String),
    Num(f64),
}

pub fn write_json(run: &RankingRun, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(run).context("serialize ranking run")?;
    fs::write(path, json).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

/// One sheet per cohort, then a cross-cohort `Global` sheet and a `Summary`.
pub fn write_xlsx(run: &RankingRun, path: &Path) -> Result<()> {
    let global = global_ranking(run);
    let global_pos = |t: &TeamRanking| {
        global
            .iter()
            .position(|g| g.team_id == t.team_id && g.cohort == t.cohort)
            .map(|p| p + 1)
    };

    let mut workbook = Workbook::new();
    for report in &run.cohorts {
        let mut rows = vec![header_row()];
        rows.extend(report.teams.iter().map(|t| team_row(t, global_pos(t))));
        for u in &report.unranked {
            rows.push(vec![
                Cell::Text(String::new()),
                Cell::Text(u.team_id.clone()),
                Cell::Text(report.cohort.to_string()),
                Cell::Text(u.status.label().to_string()),
                Cell::Num(0.0),
            ]);
        }
        let sheet = workbook.add_worksheet();
        sheet.set_name(report.cohort.to_string())?;
        write_rows(sheet, &rows)?;
    }
    {
        let mut rows = vec![header_row()];
        rows.extend(global.iter().enumerate().map(|(idx, t)| team_row(t, Some(idx + 1))));
        let sheet = workbook.add_worksheet();
        sheet.set_name("Global")?;
        write_rows(sheet, &rows)?;
    }
    {
        let mut rows = vec![
            [
                "cohort",
                "anchor",
                "ranked",
                "unranked",
                "games_in_window",
                "sos_iterations",
                "ml_available",
                "ml_note",
                "error",
            ]
            .iter()
            .map(|h| Cell::Text(h.to_string()))
            .collect::<Vec<_>>(),
        ];
        rows.extend(run.cohorts.iter().map(summary_row));
        let sheet = workbook.add_worksheet();
        sheet.set_name("Summary")?;
        write_rows(sheet, &rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    Ok(())
}

fn header_row() -> Vec<Cell> {
    TEAM_HEADER.iter().map(|h| Cell::Text(h.to_string())).collect()
}

fn team_row(t: &TeamRanking, global_rank: Option<usize>) -> Vec<Cell> {
    vec![
        opt_num(t.rank_in_cohort.map(|r| r as f64)),
        Cell::Text(t.team_id.clone()),
        Cell::Text(t.cohort.to_string()),
        Cell::Text(t.status.label().to_string()),
        Cell::Num(t.games_played as f64),
        Cell::Text(t.last_game.map(|d| d.to_string()).unwrap_or_default()),
        Cell::Num(t.off_raw),
        Cell::Num(t.def_raw),
        Cell::Num(t.off_norm),
        Cell::Num(t.def_norm),
        Cell::Text(if t.metric_outlier { "yes" } else { "no" }.to_string()),
        Cell::Num(t.abs_strength),
        Cell::Num(t.sos),
        Cell::Num(t.sos_adj),
        Cell::Num(t.sos_norm),
        Cell::Num(t.bridge_count as f64),
        Cell::Num(t.connectivity_factor),
        Cell::Num(t.perf_raw),
        Cell::Num(t.perf_centered),
        Cell::Num(t.powerscore_core),
        Cell::Num(t.provisional_mult),
        Cell::Num(t.powerscore_adj),
        opt_num(t.ml_residual),
        Cell::Num(t.ml_norm),
        Cell::Num(t.ml_scale),
        Cell::Num(t.ml_delta),
        Cell::Num(t.powerscore_blended),
        Cell::Num(t.power_score_final),
        opt_num(global_rank.map(|r| r as f64)),
    ]
}

fn summary_row(report: &CohortReport) -> Vec<Cell> {
    vec![
        Cell::Text(report.cohort.to_string()),
        opt_num(report.anchor),
        Cell::Num(report.teams.len() as f64),
        Cell::Num(report.unranked.len() as f64),
        Cell::Num(report.window.games_in_window as f64),
        Cell::Num(report.sos_iterations_run as f64),
        Cell::Text(if report.ml.available { "yes" } else { "no" }.to_string()),
        Cell::Text(report.ml.reason.as_ref().map(|e| e.to_string()).unwrap_or_default()),
        Cell::Text(report.error.as_ref().map(|e| e.to_string()).unwrap_or_default()),
    ]
}

fn opt_num(value: Option<f64>) -> Cell {
    match value {
        Some(v) => Cell::Num(v),
        None => Cell::Text(String::new()),
    }
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<Cell>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            let written = match cell {
                Cell::Text(s) if s.is_empty() => continue,
                Cell::Text(s) => worksheet.write_string(r, c, s),
                Cell::Num(v) => worksheet.write_number(r, c, *v),
            };
            written.with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
