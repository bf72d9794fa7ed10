use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::MinerError;
use crate::fs_util::extract_tar_gz;
use crate::providers::Downloader;
use crate::sheet::{Table, inner_join, read_csv_table, write_csv_table};

pub const MANIFEST_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pub/pmc/oa_comm_use_file_list.csv";
pub const PACKAGE_BASE_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pub/pmc/";
pub const IMAGE_PREFERENCE: [&str; 5] = ["jpg", "png", "jpeg", "bmp", "gif"];

const LIST_PREFIX: &str = "pmc_result_";
const LIST_SUFFIX: &str = ".txt";
const ACCESSION_COLUMN: &str = "Accession ID";
const FILE_COLUMN: &str = "File";

pub fn merge_manual_lists(dir: &Path, out: &Path) -> Result<usize, MinerError> {
    if !dir.is_dir() {
        return Err(MinerError::MissingInput(dir.to_path_buf()));
    }
    let mut names = fs::read_dir(dir)
        .map_err(|err| MinerError::Filesystem(format!("{}: {err}", dir.display())))?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(LIST_PREFIX) && name.ends_with(LIST_SUFFIX))
        .collect::<Vec<_>>();
    names.sort();

    let mut table = Table::new(["ftu", "pmcid"]);
    for name in names {
        let ftu = &name[LIST_PREFIX.len()..name.len() - LIST_SUFFIX.len()];
        let content = fs::read_to_string(dir.join(&name))
            .map_err(|err| MinerError::Filesystem(format!("{name}: {err}")))?;
        for pmcid in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
            table.push(vec![ftu.to_string(), pmcid.to_string()]);
        }
    }
    write_csv_table(out, &table)?;
    info!(rows = table.len(), output = %out.display(), "manual lists merged");
    Ok(table.len())
}

pub fn join_manifest(ids_csv: &Path, manifest_csv: &Path, out: &Path) -> Result<usize, MinerError> {
    let ids = read_csv_table(ids_csv)?;
    let mut manifest = read_csv_table(manifest_csv)?;
    manifest.rename_column(ACCESSION_COLUMN, "pmcid");
    let joined = inner_join(
        &ids,
        &manifest,
        ("pmcid", "pmcid"),
        (&ids_csv.display().to_string(), &manifest_csv.display().to_string()),
    )?;
    write_csv_table(out, &joined)?;
    info!(rows = joined.len(), output = %out.display(), "manifest joined");
    Ok(joined.len())
}

pub fn download_manifest<D: Downloader>(
    downloader: &D,
    url: &str,
    dest: &Path,
) -> Result<u64, MinerError> {
    let bytes = downloader.download(url, dest)?;
    info!(url, bytes, dest = %dest.display(), "manifest downloaded");
    Ok(bytes)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum PackageOutcome {
    Downloaded,
    Skipped,
    Failed,
}

pub fn download_packages<D: Downloader>(
    downloader: &D,
    joined_csv: &Path,
    out_dir: &Path,
    base_url: &str,
    workers: usize,
    sink: &dyn ProgressSink,
) -> Result<DownloadReport, MinerError> {
    let table = read_csv_table(joined_csv)?;
    let source_name = joined_csv.display().to_string();
    let pmcids = table.column("pmcid", &source_name)?;
    let files = table.column(FILE_COLUMN, &source_name)?;
    fs::create_dir_all(out_dir).map_err(|err| MinerError::Filesystem(err.to_string()))?;
    sink.event(ProgressEvent {
        message: format!("phase=Download; {} packages", pmcids.len()),
        elapsed: None,
    });

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|err| MinerError::ConfigInvalid(err.to_string()))?;
    let outcomes = pool.install(|| {
        pmcids
            .par_iter()
            .zip(files.par_iter())
            .map(|(pmcid, file)| {
                if out_dir.join(pmcid).exists() {
                    return PackageOutcome::Skipped;
                }
                let url = format!("{base_url}{file}");
                let name = file.rsplit('/').next().unwrap_or(file.as_str());
                match downloader.download(&url, &out_dir.join(name)) {
                    Ok(_) => PackageOutcome::Downloaded,
                    Err(err) => {
                        warn!(pmcid, url, error = %err, "package download failed");
                        PackageOutcome::Failed
                    }
                }
            })
            .collect::<Vec<_>>()
    });

    let mut report = DownloadReport::default();
    for outcome in outcomes {
        match outcome {
            PackageOutcome::Downloaded => report.downloaded += 1,
            PackageOutcome::Skipped => report.skipped += 1,
            PackageOutcome::Failed => report.failed += 1,
        }
    }
    info!(
        downloaded = report.downloaded,
        skipped = report.skipped,
        failed = report.failed,
        "packages fetched"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveError {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UntarReport {
    pub extracted: usize,
    pub errors: Vec<ArchiveError>,
    pub error_log: Option<PathBuf>,
}

pub fn archives(root: &Path) -> Vec<PathBuf> {
    let mut found = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.to_string_lossy().ends_with(".tar.gz"))
        .collect::<Vec<_>>();
    found.sort();
    found
}

fn untar_one(archive: &Path) -> Result<(), ArchiveError> {
    let target = archive.parent().unwrap_or(Path::new("."));
    let outcome = match fs::metadata(archive) {
        Ok(metadata) if metadata.len() == 0 => Err("Empty file".to_string()),
        Ok(_) => extract_tar_gz(archive, target)
            .map(|_| ())
            .map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };
    if let Err(err) = fs::remove_file(archive) {
        warn!(archive = %archive.display(), error = %err, "could not delete archive");
    }
    outcome.map_err(|error| ArchiveError {
        file: archive.display().to_string(),
        error,
    })
}

/// Extracts every `*.tar.gz` under `root` next to itself and deletes it.
/// Empty or unreadable archives are deleted too and listed in `error_log`,
/// which is only written when something failed.
pub fn untar_all(root: &Path, error_log: &Path, workers: usize) -> Result<UntarReport, MinerError> {
    let found = archives(root);
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|err| MinerError::ConfigInvalid(err.to_string()))?;
    let outcomes = pool.install(|| {
        found
            .par_iter()
            .map(|archive| untar_one(archive))
            .collect::<Vec<_>>()
    });

    let mut report = UntarReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(()) => report.extracted += 1,
            Err(error) => {
                warn!(file = %error.file, error = %error.error, "archive failed");
                report.errors.push(error);
            }
        }
    }
    if !report.errors.is_empty() {
        let mut table = Table::new(["File", "Error"]);
        for error in &report.errors {
            table.push(vec![error.file.clone(), error.error.clone()]);
        }
        write_csv_table(error_log, &table)?;
        report.error_log = Some(error_log.to_path_buf());
    }
    Ok(report)
}

pub fn select_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut order = Vec::new();
    let mut by_stem = HashMap::<String, HashMap<String, PathBuf>>::new();
    for path in paths {
        let (Some(stem), Some(ext)) = (path.file_stem(), path.extension()) else {
            continue;
        };
        let ext = ext.to_string_lossy().to_lowercase();
        if !IMAGE_PREFERENCE.contains(&ext.as_str()) {
            continue;
        }
        let stem = stem.to_string_lossy().into_owned();
        let formats = by_stem.entry(stem.clone()).or_insert_with(|| {
            order.push(stem);
            HashMap::new()
        });
        formats.insert(ext, path.clone());
    }
    order
        .iter()
        .filter_map(|stem| {
            let formats = by_stem.get(stem)?;
            IMAGE_PREFERENCE
                .iter()
                .find_map(|ext| formats.get(*ext).cloned())
        })
        .collect()
}

pub fn collect_image_paths(root: &Path, out: &Path) -> Result<usize, MinerError> {
    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    files.sort();
    let selected = select_images(&files);
    let mut table = Table::new(["image_path"]);
    for path in &selected {
        table.push(vec![path.display().to_string()]);
    }
    write_csv_table(out, &table)?;
    info!(images = selected.len(), output = %out.display(), "image paths collected");
    Ok(selected.len())
}
