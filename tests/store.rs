use std::fs;

use camino::Utf8PathBuf;
use ftu_miner::domain::TagDomain;
use ftu_miner::store::{Store, batch_files};

fn store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, Store::new(root))
}

#[test]
fn agreement_files_are_ordered_by_round() {
    let (_dir, store) = store();
    store.ensure_domain_dir(TagDomain::Age).unwrap();
    for name in [
        "same_10.xlsx",
        "same-others_2.xlsx",
        "same_2.xlsx",
        "same_1.xlsx",
        "merged_age_1.xlsx",
        "notes.txt",
    ] {
        fs::write(store.domain_dir(TagDomain::Age).join(name), b"").unwrap();
    }

    let names = store
        .agreement_files(TagDomain::Age)
        .unwrap()
        .into_iter()
        .map(|path| path.file_name().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec!["same_1.xlsx", "same-others_2.xlsx", "same_2.xlsx", "same_10.xlsx"]
    );
}

#[test]
fn batch_files_sort_numerically() {
    let (_dir, store) = store();
    let dir = store.batch_dir(TagDomain::Sex, 0);
    fs::create_dir_all(&dir).unwrap();
    for name in ["results_batch_10.xlsx", "results_batch_2.xlsx", "other.xlsx"] {
        fs::write(dir.join(name), b"").unwrap();
    }
    let indexes = batch_files(&dir)
        .unwrap()
        .into_iter()
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    assert_eq!(indexes, vec![2, 10]);
}

#[test]
fn missing_domain_dir_has_no_files() {
    let (_dir, store) = store();
    assert!(store.agreement_files(TagDomain::Bmi).unwrap().is_empty());
    assert!(batch_files(&store.batch_dir(TagDomain::Bmi, 0)).unwrap().is_empty());
}
