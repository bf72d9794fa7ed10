use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ftu_miner::batch::{BatchOptions, classifications_table, read_classifications, run_batch};
use ftu_miner::classify::Classifier;
use ftu_miner::domain::{Classification, Labels, TagDomain};
use ftu_miner::error::MinerError;
use ftu_miner::llm::{ChatClient, ChatRequest};
use ftu_miner::output::JsonOutput;
use ftu_miner::rounds::{RoundFile, advance, merge_round};
use ftu_miner::sheet::{read_csv_table, write_xlsx_table};
use ftu_miner::store::Store;

/// Records every prompt and answers with the age class of the item.
#[derive(Default)]
struct Recording {
    prompts: Mutex<Vec<String>>,
}

impl ChatClient for Recording {
    fn chat(&self, request: &ChatRequest) -> Result<String, MinerError> {
        self.prompts.lock().unwrap().push(request.user.clone());
        if request.user.contains("**E14.5**") {
            Ok("[\"prenatal\"]".to_string())
        } else {
            Ok("[\"postnatal\"]".to_string())
        }
    }
}

fn store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let store = Store::new(root);
    store.ensure_domain_dir(TagDomain::Age).unwrap();
    (dir, store)
}

fn labels(values: &[&str]) -> Labels {
    Labels::new(values.iter().map(|value| value.to_string()).collect())
}

fn write_merged(store: &Store, round: u32, rows: &[Classification]) {
    write_xlsx_table(
        store.merged(TagDomain::Age, round).as_std_path(),
        &classifications_table(TagDomain::Age, rows),
    )
    .unwrap();
}

#[test]
fn batch_resumes_after_existing_files() {
    let (_dir, store) = store();
    fs::write(
        store.round_input(TagDomain::Age, 0),
        "age\nadult\nE14.5\nadult\nP7\n",
    )
    .unwrap();
    let batch_dir = store.batch_dir(TagDomain::Age, 0);
    fs::create_dir_all(&batch_dir).unwrap();
    write_xlsx_table(
        store.batch_file(TagDomain::Age, 0, 1).as_std_path(),
        &classifications_table(
            TagDomain::Age,
            &[
                Classification::classified("adult", labels(&["postnatal"])),
                Classification::classified("P7", labels(&["postnatal"])),
            ],
        ),
    )
    .unwrap();

    let client = Recording::default();
    let classifier = Classifier::new(&client, "m", 1);
    let options = BatchOptions {
        batch_size: 10,
        workers: None,
    };
    let report = run_batch(&store, TagDomain::Age, 0, &classifier, options, &JsonOutput).unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.unresolved, 0);
    assert_eq!(client.prompts.lock().unwrap().len(), 1);
    assert_eq!(report.files.len(), 1);
    assert!(report.files[0].ends_with("results_batch_2.xlsx"));

    let written = read_classifications(&store.batch_file(TagDomain::Age, 0, 2), TagDomain::Age)
        .unwrap();
    assert_eq!(
        written,
        vec![Classification::classified("E14.5", labels(&["prenatal"]))]
    );

    let merged = merge_round(&store, TagDomain::Age, 0).unwrap();
    assert_eq!((merged.batch_files, merged.rows), (2, 3));
}

#[test]
fn parallel_workers_classify_every_item() {
    let (_dir, store) = store();
    fs::write(store.round_input(TagDomain::Age, 0), "age\nE14.5\nP1\nP2\nP3\n").unwrap();
    let client = Recording::default();
    let options = BatchOptions {
        batch_size: 3,
        workers: Some(4),
    };
    let report = run_batch(
        &store,
        TagDomain::Age,
        0,
        &Classifier::new(&client, "m", 1),
        options,
        &JsonOutput,
    )
    .unwrap();
    assert_eq!(report.processed, 4);
    assert_eq!(report.files.len(), 2);
}

#[test]
fn advance_splits_agreement_from_carried_items() {
    let (_dir, store) = store();
    RoundFile::for_domain(&store, TagDomain::Age).write(1).unwrap();
    write_merged(
        &store,
        0,
        &[
            Classification::classified("adult", labels(&["postnatal"])),
            Classification::classified("n/a", labels(&["others"])),
            Classification::classified("E10", labels(&["prenatal"])),
            Classification::unresolved("???"),
        ],
    );
    write_merged(
        &store,
        1,
        &[
            Classification::classified("adult", labels(&["postnatal"])),
            Classification::classified("n/a", labels(&["others"])),
            Classification::classified("E10", labels(&["postnatal"])),
            Classification::unresolved("???"),
        ],
    );

    let report = advance(&store, TagDomain::Age, 10).unwrap();
    assert_eq!((report.from_round, report.to_round), (1, 2));
    assert_eq!((report.same, report.same_others, report.carried), (1, 1, 2));
    assert_eq!(RoundFile::for_domain(&store, TagDomain::Age).read().unwrap(), 2);

    let next = read_csv_table(store.round_input(TagDomain::Age, 2).as_std_path()).unwrap();
    assert_eq!(next.column("age", "age_2").unwrap(), vec!["E10", "???"]);
    assert!(store.same(TagDomain::Age, 1).as_std_path().exists());
    assert!(store.same_others(TagDomain::Age, 1).as_std_path().exists());
}

#[test]
fn advance_without_previous_merge_fails() {
    let (_dir, store) = store();
    RoundFile::for_domain(&store, TagDomain::Age).write(1).unwrap();
    write_merged(
        &store,
        1,
        &[Classification::classified("adult", labels(&["postnatal"]))],
    );
    assert_matches!(
        advance(&store, TagDomain::Age, 10),
        Err(MinerError::NoPreviousRound(1))
    );
    assert_eq!(RoundFile::for_domain(&store, TagDomain::Age).read().unwrap(), 1);
}

#[test]
fn merge_without_batches_fails() {
    let (_dir, store) = store();
    assert_matches!(
        merge_round(&store, TagDomain::Age, 0),
        Err(MinerError::NothingToMerge(_))
    );
}
