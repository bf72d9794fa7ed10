use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::classify::Classifier;
use crate::domain::{Classification, ClassificationStatus, Labels, RoundNumber, TagDomain};
use crate::error::MinerError;
use crate::llm::ChatClient;
use crate::sheet::{Table, read_csv_table, read_xlsx_table, write_xlsx_table};
use crate::store::{Store, batch_files};

pub const LABEL_COLUMN: &str = "json_rs";
pub const STATUS_COLUMN: &str = "status";
// Older batch sheets name the label column `categories`.
const LEGACY_LABEL_COLUMN: &str = "categories";

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Concurrent classification calls; `None` runs sequentially.
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub domain: String,
    pub round: RoundNumber,
    pub total: usize,
    pub skipped: usize,
    pub processed: usize,
    pub unresolved: usize,
    pub files: Vec<String>,
}

/// Items already present in any batch file of `dir`. Unreadable files are
/// skipped with a warning, so their items are classified again.
pub fn load_processed(dir: &Utf8Path, domain: TagDomain) -> Result<HashSet<String>, MinerError> {
    let mut processed = HashSet::new();
    for (_, path) in batch_files(dir)? {
        match read_xlsx_table(path.as_std_path())
            .and_then(|table| table.column(domain.key(), path.as_str()))
        {
            Ok(items) => processed.extend(items),
            Err(err) => warn!(path = %path, error = %err, "skipping unreadable batch file"),
        }
    }
    Ok(processed)
}

pub fn remaining(all: &[String], processed: &HashSet<String>) -> Vec<String> {
    let mut seen: HashSet<&String> = HashSet::new();
    all.iter()
        .filter(|item| !processed.contains(item.as_str()))
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}

pub fn already_processed(all: &[String], processed: &HashSet<String>) -> usize {
    all.iter()
        .filter(|item| processed.contains(item.as_str()))
        .collect::<HashSet<_>>()
        .len()
}

pub fn read_classifications(
    path: &Utf8Path,
    domain: TagDomain,
) -> Result<Vec<Classification>, MinerError> {
    let table = read_xlsx_table(path.as_std_path())?;
    classifications_from_table(&table, domain, path.as_str())
}

pub fn classifications_from_table(
    table: &Table,
    domain: TagDomain,
    source_name: &str,
) -> Result<Vec<Classification>, MinerError> {
    let item_index = table.require_column(domain.key(), source_name)?;
    let label_index = table
        .index_of(LABEL_COLUMN)
        .or_else(|| table.index_of(LEGACY_LABEL_COLUMN))
        .ok_or_else(|| MinerError::MissingColumn {
            column: LABEL_COLUMN.to_string(),
            source_name: source_name.to_string(),
        })?;
    let status_index = table.index_of(STATUS_COLUMN);

    let mut out = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        let status = match status_index {
            Some(index) => table.cell(row, index).parse()?,
            None => ClassificationStatus::Classified,
        };
        out.push(Classification {
            item: table.cell(row, item_index).to_string(),
            labels: Labels::parse_cell(table.cell(row, label_index))?,
            status,
        });
    }
    Ok(out)
}

pub fn classifications_table(domain: TagDomain, rows: &[Classification]) -> Table {
    let mut table = Table::new([domain.key(), LABEL_COLUMN, STATUS_COLUMN]);
    for row in rows {
        table.push(vec![
            row.item.clone(),
            row.labels.to_json(),
            row.status.as_str().to_string(),
        ]);
    }
    table
}

pub struct BatchWriter {
    domain: TagDomain,
    dir: Utf8PathBuf,
    batch_size: usize,
    next_index: usize,
    pending: Vec<Classification>,
    files: Vec<Utf8PathBuf>,
}

impl BatchWriter {
    pub fn new(
        store: &Store,
        domain: TagDomain,
        round: RoundNumber,
        batch_size: usize,
    ) -> Result<Self, MinerError> {
        let dir = store.batch_dir(domain, round);
        let next_index = batch_files(&dir)?
            .last()
            .map(|(index, _)| index + 1)
            .unwrap_or(1);
        Ok(Self {
            domain,
            dir,
            batch_size: batch_size.max(1),
            next_index,
            pending: Vec::new(),
            files: Vec::new(),
        })
    }

    pub fn push(&mut self, classification: Classification) -> Result<(), MinerError> {
        self.pending.push(classification);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), MinerError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let path = self
            .dir
            .join(format!("results_batch_{}.xlsx", self.next_index));
        write_xlsx_table(
            path.as_std_path(),
            &classifications_table(self.domain, &self.pending),
        )?;
        info!(path = %path, rows = self.pending.len(), "batch saved");
        self.pending.clear();
        self.next_index += 1;
        self.files.push(path);
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<Utf8PathBuf>, MinerError> {
        self.flush()?;
        Ok(self.files)
    }
}

pub fn run_batch<C: ChatClient>(
    store: &Store,
    domain: TagDomain,
    round: RoundNumber,
    classifier: &Classifier<C>,
    options: BatchOptions,
    sink: &dyn ProgressSink,
) -> Result<BatchReport, MinerError> {
    let input = store.round_input(domain, round);
    let table = read_csv_table(input.as_std_path())?;
    let all = table
        .column(domain.key(), input.as_str())?
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .collect::<Vec<_>>();

    let processed = load_processed(&store.batch_dir(domain, round), domain)?;
    let todo = remaining(&all, &processed);
    let mut report = BatchReport {
        domain: domain.key().to_string(),
        round,
        total: all.len(),
        skipped: already_processed(&all, &processed),
        ..BatchReport::default()
    };
    sink.event(ProgressEvent {
        message: format!(
            "phase=Classify; {domain} round {round}: {} total, {} remaining",
            report.total,
            todo.len()
        ),
        elapsed: None,
    });
    if todo.is_empty() {
        info!(%domain, round, "no new items to process");
        return Ok(report);
    }

    let mut writer = BatchWriter::new(store, domain, round, options.batch_size)?;
    match options.workers {
        Some(workers) if workers > 1 => {
            let pool = ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|err| MinerError::ConfigInvalid(err.to_string()))?;
            for chunk in todo.chunks(options.batch_size.max(1)) {
                let results = pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|item| classifier.classify(domain, item))
                        .collect::<Vec<_>>()
                });
                for result in results {
                    record(&mut report, &mut writer, result)?;
                }
                sink.event(progress(&report, todo.len()));
            }
        }
        _ => {
            for item in &todo {
                let result = classifier.classify(domain, item);
                record(&mut report, &mut writer, result)?;
                if report.processed % options.batch_size.max(1) == 0 {
                    sink.event(progress(&report, todo.len()));
                }
            }
        }
    }

    report.files = writer
        .finish()?
        .into_iter()
        .map(|path| path.to_string())
        .collect();
    Ok(report)
}

fn record(
    report: &mut BatchReport,
    writer: &mut BatchWriter,
    result: Classification,
) -> Result<(), MinerError> {
    report.processed += 1;
    if result.is_unresolved() {
        report.unresolved += 1;
    }
    writer.push(result)
}

fn progress(report: &BatchReport, todo: usize) -> ProgressEvent {
    ProgressEvent {
        message: format!("phase=Classify; {}/{todo} classified", report.processed),
        elapsed: None,
    }
}
