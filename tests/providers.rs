use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

use ftu_miner::error::MinerError;
use ftu_miner::output::JsonOutput;
use ftu_miner::providers::Downloader;
use ftu_miner::providers::bioportal::{BioportalClient, describe_csv};
use ftu_miner::providers::ols::{clean_parts, export_classes, fetch_and_export, part_file};
use ftu_miner::providers::pmc::{
    collect_image_paths, download_packages, join_manifest, merge_manual_lists, untar_all,
};
use ftu_miner::sheet::{read_csv_table, read_xlsx_table};

/// Writes a marker file for every URL except those mentioning `fail`.
#[derive(Default)]
struct FakeDownloader {
    urls: Mutex<Vec<String>>,
}

impl Downloader for FakeDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<u64, MinerError> {
        self.urls.lock().unwrap().push(url.to_string());
        if url.contains("fail") {
            return Err(MinerError::DownloadStatus {
                status: 404,
                message: url.to_string(),
            });
        }
        fs::write(dest, url).unwrap();
        Ok(url.len() as u64)
    }
}

fn tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
    let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn manual_lists_join_the_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let lists = dir.path().join("lists");
    fs::create_dir_all(&lists).unwrap();
    fs::write(lists.join("pmc_result_kidney.txt"), "PMC1\n\nPMC2\n").unwrap();
    fs::write(lists.join("pmc_result_lung.txt"), "PMC3\n").unwrap();
    fs::write(lists.join("readme.md"), "ignored").unwrap();

    let ids = dir.path().join("ids.csv");
    assert_eq!(merge_manual_lists(&lists, &ids).unwrap(), 3);
    let merged = read_csv_table(&ids).unwrap();
    assert_eq!(merged.column("ftu", "ids").unwrap(), vec!["kidney", "kidney", "lung"]);

    let manifest = dir.path().join("manifest.csv");
    fs::write(
        &manifest,
        "File,Article Citation,Accession ID,Last Updated (YYYY-MM-DD HH:MM:SS),PMID,License\n\
         oa_package/08/e0/PMC1.tar.gz,Kidney Int. 2018,PMC1,2019-01-01 00:00:00,30200001,CC BY\n\
         oa_package/aa/bb/PMC3.tar.gz,Lung. 2020,PMC3,2021-01-01 00:00:00,30200003,CC0\n",
    )
    .unwrap();
    let joined = dir.path().join("joined.csv");
    assert_eq!(join_manifest(&ids, &manifest, &joined).unwrap(), 2);
    let table = read_csv_table(&joined).unwrap();
    assert_eq!(table.column("pmcid", "joined").unwrap(), vec!["PMC1", "PMC3"]);
    assert_eq!(
        table.column("File", "joined").unwrap(),
        vec!["oa_package/08/e0/PMC1.tar.gz", "oa_package/aa/bb/PMC3.tar.gz"]
    );
}

#[test]
fn missing_list_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    assert_matches!(
        merge_manual_lists(&dir.path().join("absent"), &dir.path().join("ids.csv")),
        Err(MinerError::MissingInput(_))
    );
}

#[test]
fn packages_skip_existing_and_count_failures() {
    let dir = tempfile::tempdir().unwrap();
    let joined = dir.path().join("joined.csv");
    fs::write(
        &joined,
        "ftu,pmcid,File\n\
         kidney,PMC1,oa_package/08/e0/PMC1.tar.gz\n\
         kidney,PMC2,oa_package/fail/PMC2.tar.gz\n\
         lung,PMC3,oa_package/aa/bb/PMC3.tar.gz\n",
    )
    .unwrap();
    let out = dir.path().join("pmc");
    fs::create_dir_all(out.join("PMC3")).unwrap();

    let downloader = FakeDownloader::default();
    let report = download_packages(
        &downloader,
        &joined,
        &out,
        "https://mirror.test/pub/pmc/",
        4,
        &JsonOutput,
    )
    .unwrap();
    assert_eq!(
        (report.downloaded, report.skipped, report.failed),
        (1, 1, 1)
    );
    assert_eq!(
        fs::read_to_string(out.join("PMC1.tar.gz")).unwrap(),
        "https://mirror.test/pub/pmc/oa_package/08/e0/PMC1.tar.gz"
    );
    assert_eq!(downloader.urls.lock().unwrap().len(), 2);
}

#[test]
fn untar_logs_broken_archives_and_removes_all() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pmc");
    fs::create_dir_all(&root).unwrap();
    tar_gz(
        &root.join("PMC1.tar.gz"),
        &[
            ("PMC1/ki.nxml", &b"<article/>"[..]),
            ("PMC1/fig1.png", &b"png"[..]),
            ("PMC1/fig1.jpg", &b"jpg"[..]),
            ("PMC1/fig2.gif", &b"gif"[..]),
        ],
    );
    File::create(root.join("PMC2.tar.gz")).unwrap();
    let mut garbage = File::create(root.join("PMC3.tar.gz")).unwrap();
    garbage.write_all(b"not a gzip stream").unwrap();
    drop(garbage);

    let log = dir.path().join("untar_errors.csv");
    let report = untar_all(&root, &log, 2).unwrap();
    assert_eq!(report.extracted, 1);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().any(|error| error.error == "Empty file"));
    assert_eq!(report.error_log.as_deref(), Some(log.as_path()));
    assert_eq!(read_csv_table(&log).unwrap().len(), 2);

    assert!(root.join("PMC1/ki.nxml").exists());
    for name in ["PMC1.tar.gz", "PMC2.tar.gz", "PMC3.tar.gz"] {
        assert!(!root.join(name).exists(), "{name} should be removed");
    }

    let images = dir.path().join("images.csv");
    assert_eq!(collect_image_paths(&root, &images).unwrap(), 2);
    let paths = read_csv_table(&images)
        .unwrap()
        .column("image_path", "images")
        .unwrap()
        .into_iter()
        .map(PathBuf::from)
        .collect::<Vec<_>>();
    assert_eq!(paths, vec![root.join("PMC1/fig1.jpg"), root.join("PMC1/fig2.gif")]);
}

#[test]
fn clean_run_writes_no_error_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("untar_errors.csv");
    let report = untar_all(dir.path(), &log, 1).unwrap();
    assert_eq!(report.extracted, 0);
    assert!(report.error_log.is_none());
    assert!(!log.exists());
}

fn ols_dump() -> Vec<u8> {
    let dump = json!({
        "ontologies": [
            {"ontologyId": "empty", "classes": []},
            {
                "ontologyId": "uberon",
                "classes": [
                    {
                        "curie": {"value": "UBERON:0002113"},
                        "http://www.w3.org/2000/01/rdf-schema#label": {"value": "kidney"},
                        "label": {"value": "kidney"},
                        "definition": {"value": "An organ that filters blood."},
                        "iri": "http://purl.obolibrary.org/obo/UBERON_0002113"
                    },
                    {
                        "curie": {"value": "UBERON:0001225"},
                        "http://www.w3.org/2000/01/rdf-schema#label": {"value": "cortex of kidney"},
                        "label": {"value": "renal cortex"}
                    }
                ]
            },
            {"ontologyId": "late", "classes": [{"curie": {"value": "X:1"}}]}
        ]
    });
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(dump.to_string().as_bytes()).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn ols_export_then_clean() {
    let dir = tempfile::tempdir().unwrap();
    let exported = dir.path().join("parts");
    fs::create_dir_all(&exported).unwrap();

    let report = export_classes(ols_dump().as_slice(), 0, Some(2), &exported, &JsonOutput).unwrap();
    assert_eq!(report.ontologies, 2);
    assert_eq!(report.empty, vec![0]);
    assert_eq!(report.files, vec![part_file(&exported, 1, 1)]);
    assert!(!part_file(&exported, 2, 1).exists());

    let part = read_xlsx_table(&part_file(&exported, 1, 1)).unwrap();
    assert_eq!(part.len(), 2);
    assert_eq!(part.headers[0], "curie.value");

    let cleaned_dir = dir.path().join("clean");
    fs::create_dir_all(&cleaned_dir).unwrap();
    let cleaned = clean_parts(&exported, &cleaned_dir, 0, 5).unwrap();
    assert_eq!(cleaned.written.len(), 1);
    let table = read_xlsx_table(&cleaned.written[0]).unwrap();
    assert_eq!(
        table.column("label.value", "clean").unwrap(),
        vec!["", "renal cortex"]
    );
    let definition: Value =
        serde_json::from_str(&table.column("definition", "clean").unwrap()[0]).unwrap();
    assert_eq!(definition["definition.value"], "An organ that filters blood.");
    assert!(table.index_of("iri").is_none());

    let again = clean_parts(&exported, &cleaned_dir, 0, 5).unwrap();
    assert_eq!((again.written.len(), again.skipped), (0, 1));
}

#[test]
fn ols_dump_is_downloaded_once() {
    let dir = tempfile::tempdir().unwrap();
    let gz = dir.path().join("ontologies.json.gz");
    fs::write(&gz, ols_dump()).unwrap();
    let out = dir.path().join("parts");
    fs::create_dir_all(&out).unwrap();

    let downloader = FakeDownloader::default();
    let report = fetch_and_export(&downloader, "https://ols.test/dump.gz", &gz, 1, None, &out, &JsonOutput)
        .unwrap();
    assert!(downloader.urls.lock().unwrap().is_empty());
    assert_eq!(report.ontologies, 2);
    assert_eq!(report.files.len(), 2);
}

struct FakeBioportal;

impl BioportalClient for FakeBioportal {
    fn search(&self, term: &str) -> Result<Value, MinerError> {
        match term {
            "UBERON:0002113" => Ok(json!({
                "collection": [
                    {"prefLabel": "kidney", "synonym": ["renal organ"]},
                    {"prefLabel": "kidney", "synonym": ["renal organ"]}
                ]
            })),
            _ => Err(MinerError::BioportalStatus {
                status: 500,
                message: term.to_string(),
            }),
        }
    }
}

#[test]
fn bioportal_descriptions_skip_failed_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("ids.csv");
    fs::write(&input, "uberon_id\nUBERON:0002113\nUBERON:9999999\n\n").unwrap();
    let output = dir.path().join("descriptions.csv");

    assert_eq!(describe_csv(&FakeBioportal, &input, &output, &JsonOutput).unwrap(), 1);
    let table = read_csv_table(&output).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.rows[0][0], "UBERON:0002113");
    assert_eq!(table.rows[0][3], "N/A");
}
