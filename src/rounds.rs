use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};
use crate::batch::{
    BatchOptions, BatchReport, LABEL_COLUMN, classifications_table, load_processed,
    read_classifications, run_batch,
};
use crate::classify::Classifier;
use crate::domain::{Classification, Labels, RoundNumber, TagDomain};
use crate::error::MinerError;
use crate::fs_util::write_bytes_atomic;
use crate::llm::ChatClient;
use crate::sheet::{Table, read_csv_table, write_csv_table, write_xlsx_table};
use crate::store::{Store, batch_files};

#[derive(Debug, Clone)]
pub struct RoundFile {
    path: Utf8PathBuf,
}

impl RoundFile {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_domain(store: &Store, domain: TagDomain) -> Self {
        Self::new(store.round_file(domain))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().exists()
    }

    pub fn read(&self) -> Result<RoundNumber, MinerError> {
        if !self.exists() {
            return Err(MinerError::MissingRoundFile(self.path.clone().into()));
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| MinerError::Filesystem(err.to_string()))?;
        let first = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| self.malformed("file is empty".to_string()))?;
        let cell = first.split(',').next().unwrap_or(first).trim();
        cell.parse::<RoundNumber>()
            .map_err(|err| self.malformed(format!("`{cell}`: {err}")))
    }

    pub fn write(&self, round: RoundNumber) -> Result<(), MinerError> {
        write_bytes_atomic(self.path.as_std_path(), format!("{round}\n").as_bytes())
    }

    fn malformed(&self, message: String) -> MinerError {
        MinerError::InvalidRoundFile {
            path: self.path.clone().into(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarriedItem {
    pub item: String,
    pub current: Labels,
    pub previous: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundDiff {
    pub same: Vec<Classification>,
    pub same_others: Vec<Classification>,
    pub carried: Vec<CarriedItem>,
}

/// Inner join of two rounds on the item. Agreement requires identical label
/// arrays of length one from two classified rows; an unresolved row on
/// either side is always carried.
pub fn compare_rounds(current: &[Classification], previous: &[Classification]) -> RoundDiff {
    let mut earlier = HashMap::with_capacity(previous.len());
    for row in previous {
        earlier.entry(row.item.as_str()).or_insert(row);
    }

    let mut diff = RoundDiff::default();
    let mut seen = HashSet::new();
    for row in current {
        let Some(prev) = earlier.get(row.item.as_str()) else {
            continue;
        };
        if !seen.insert(row.item.as_str()) {
            continue;
        }
        let agreed = row.labels == prev.labels && !row.is_unresolved() && !prev.is_unresolved();
        if agreed && row.labels.is_others() {
            diff.same_others.push(Classification::classified(&row.item, row.labels.clone()));
        } else if agreed && row.labels.is_singleton() {
            diff.same.push(Classification::classified(&row.item, row.labels.clone()));
        } else {
            diff.carried.push(CarriedItem {
                item: row.item.clone(),
                current: row.labels.clone(),
                previous: prev.labels.clone(),
            });
        }
    }
    diff
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub domain: String,
    pub round: RoundNumber,
    pub batch_files: usize,
    pub rows: usize,
    pub path: String,
}

pub fn merge_round(
    store: &Store,
    domain: TagDomain,
    round: RoundNumber,
) -> Result<MergeReport, MinerError> {
    let dir = store.batch_dir(domain, round);
    let files = batch_files(&dir)?;
    if files.is_empty() {
        return Err(MinerError::NothingToMerge(dir.into()));
    }

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for (_, path) in &files {
        for row in read_classifications(path, domain)? {
            if seen.insert(row.item.clone()) {
                rows.push(row);
            }
        }
    }

    let merged = store.merged(domain, round);
    write_xlsx_table(merged.as_std_path(), &classifications_table(domain, &rows))?;
    info!(%domain, round, files = files.len(), rows = rows.len(), path = %merged, "round merged");
    Ok(MergeReport {
        domain: domain.key().to_string(),
        round,
        batch_files: files.len(),
        rows: rows.len(),
        path: merged.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceReport {
    pub domain: String,
    pub from_round: RoundNumber,
    pub to_round: RoundNumber,
    pub same: usize,
    pub same_others: usize,
    pub carried: usize,
}

/// Compares round `N` with `N-1`, writes the agreement sheets and the input
/// of round `N+1`, then bumps `round.csv`. Round 0 has nothing to compare
/// with, so its items are fed to round 1 unchanged.
pub fn advance(
    store: &Store,
    domain: TagDomain,
    max_rounds: RoundNumber,
) -> Result<AdvanceReport, MinerError> {
    let round_file = RoundFile::for_domain(store, domain);
    let round = round_file.read()?;
    if round >= max_rounds {
        return Err(MinerError::RoundLimitReached {
            round,
            max_rounds,
        });
    }
    let next = round + 1;

    let report = if round == 0 {
        let input = store.round_input(domain, 0);
        let items = distinct_items(&read_csv_table(input.as_std_path())?, domain, input.as_str())?;
        let mut table = Table::new([domain.key()]);
        for item in &items {
            table.push(vec![item.clone()]);
        }
        write_csv_table(store.round_input(domain, next).as_std_path(), &table)?;
        AdvanceReport {
            domain: domain.key().to_string(),
            from_round: round,
            to_round: next,
            same: 0,
            same_others: 0,
            carried: items.len(),
        }
    } else {
        let current = read_classifications(&store.merged(domain, round), domain)?;
        let previous_path = store.merged(domain, round - 1);
        if !previous_path.as_std_path().exists() {
            return Err(MinerError::NoPreviousRound(round));
        }
        let previous = read_classifications(&previous_path, domain)?;
        let diff = compare_rounds(&current, &previous);
        write_diff(store, domain, round, &diff)?;
        AdvanceReport {
            domain: domain.key().to_string(),
            from_round: round,
            to_round: next,
            same: diff.same.len(),
            same_others: diff.same_others.len(),
            carried: diff.carried.len(),
        }
    };

    round_file.write(next)?;
    info!(
        %domain,
        from = round,
        to = next,
        same = report.same,
        same_others = report.same_others,
        carried = report.carried,
        "round advanced"
    );
    Ok(report)
}

fn write_diff(
    store: &Store,
    domain: TagDomain,
    round: RoundNumber,
    diff: &RoundDiff,
) -> Result<(), MinerError> {
    write_xlsx_table(store.same(domain, round).as_std_path(), &agreed_table(domain, &diff.same))?;
    write_xlsx_table(
        store.same_others(domain, round).as_std_path(),
        &agreed_table(domain, &diff.same_others),
    )?;
    let carried = carried_table(domain, &diff.carried);
    write_xlsx_table(store.round_pairs(domain, round + 1).as_std_path(), &carried)?;
    write_csv_table(store.round_input(domain, round + 1).as_std_path(), &carried)
}

fn agreed_table(domain: TagDomain, rows: &[Classification]) -> Table {
    let mut table = Table::new([domain.key(), LABEL_COLUMN]);
    for row in rows {
        table.push(vec![row.item.clone(), row.labels.to_json()]);
    }
    table
}

fn carried_table(domain: TagDomain, rows: &[CarriedItem]) -> Table {
    let mut table = Table::new([domain.key(), "json_rs_r1", "json_rs_r2"]);
    for row in rows {
        table.push(vec![
            row.item.clone(),
            row.current.to_json(),
            row.previous.to_json(),
        ]);
    }
    table
}

fn distinct_items(
    table: &Table,
    domain: TagDomain,
    source_name: &str,
) -> Result<Vec<String>, MinerError> {
    let mut seen = HashSet::new();
    Ok(table
        .column(domain.key(), source_name)?
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .filter(|item| seen.insert(item.clone()))
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub domain: String,
    pub items: usize,
    pub input: String,
    pub round_file: String,
}

pub fn init(
    store: &Store,
    domain: TagDomain,
    master: Option<&Utf8Path>,
    force: bool,
) -> Result<InitReport, MinerError> {
    let round_file = RoundFile::for_domain(store, domain);
    if round_file.exists() && !force {
        return Err(MinerError::AlreadyExists(round_file.path().to_path_buf().into()));
    }
    let master = master
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|| store.master_csv(domain));
    let table = read_csv_table(master.as_std_path())?;
    let items = distinct_items(&table, domain, master.as_str())?;

    store.ensure_domain_dir(domain)?;
    let input = store.round_input(domain, 0);
    let mut seed = Table::new([domain.key()]);
    for item in &items {
        seed.push(vec![item.clone()]);
    }
    write_csv_table(input.as_std_path(), &seed)?;
    round_file.write(0)?;
    info!(%domain, items = items.len(), input = %input, "round 0 seeded");

    Ok(InitReport {
        domain: domain.key().to_string(),
        items: items.len(),
        input: input.to_string(),
        round_file: round_file.path().to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundStatus {
    pub domain: String,
    pub round: RoundNumber,
    pub input_items: Option<usize>,
    pub batch_files: usize,
    pub processed: usize,
    pub merged: bool,
}

pub fn status(store: &Store, domain: TagDomain) -> Result<RoundStatus, MinerError> {
    let round = RoundFile::for_domain(store, domain).read()?;
    let input = store.round_input(domain, round);
    let input_items = if input.as_std_path().exists() {
        let table = read_csv_table(input.as_std_path())?;
        Some(distinct_items(&table, domain, input.as_str())?.len())
    } else {
        None
    };
    let dir = store.batch_dir(domain, round);
    let files = batch_files(&dir)?;
    let processed = load_processed(&dir, domain)?.len();
    Ok(RoundStatus {
        domain: domain.key().to_string(),
        round,
        input_items,
        batch_files: files.len(),
        processed,
        merged: store.merged(domain, round).as_std_path().exists(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub batch: BatchReport,
    pub merged_rows: usize,
    pub advance: AdvanceReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub domain: String,
    pub final_round: RoundNumber,
    pub rounds: Vec<RoundSummary>,
}

pub fn run<C: ChatClient>(
    store: &Store,
    domain: TagDomain,
    classifier: &Classifier<C>,
    options: BatchOptions,
    max_rounds: RoundNumber,
    sink: &dyn ProgressSink,
) -> Result<RunReport, MinerError> {
    let round_file = RoundFile::for_domain(store, domain);
    let mut rounds = Vec::new();
    loop {
        let round = round_file.read()?;
        let input = store.round_input(domain, round);
        let table = read_csv_table(input.as_std_path())?;
        if distinct_items(&table, domain, input.as_str())?.is_empty() {
            info!(%domain, round, "converged");
            return Ok(RunReport {
                domain: domain.key().to_string(),
                final_round: round,
                rounds,
            });
        }
        if round >= max_rounds {
            return Err(MinerError::RoundLimitReached { round, max_rounds });
        }

        let started = Instant::now();
        let batch = run_batch(store, domain, round, classifier, options, sink)?;
        let merged = merge_round(store, domain, round)?;
        let advance = advance(store, domain, max_rounds)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Round; {domain} round {round} done, {} carried",
                advance.carried
            ),
            elapsed: Some(started.elapsed()),
        });
        rounds.push(RoundSummary {
            batch,
            merged_rows: merged.rows,
            advance,
        });
    }
}
