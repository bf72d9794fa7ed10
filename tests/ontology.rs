use std::fs;

use ftu_miner::ontology::{SynonymIndex, evaluate, write_evaluation};
use ftu_miner::sheet::{Table, read_csv_table};

const SYNONYMS: &str = "\
Class ID,Preferred Label,Synonyms
UBERON:0002113,kidney,renal organ|nephros
UBERON:0001225,cortex of kidney,renal cortex
";

fn predictions() -> Table {
    let mut table = Table::new(["pmcid", "answer", "a", "b"]);
    table.push(vec![
        "PMC1".into(),
        r#"{"entities": ["kidney"]}"#.into(),
        r#"{"entities": ["renal organ"]}"#.into(),
        r#"["liver"]"#.into(),
    ]);
    table.push(vec![
        "PMC2".into(),
        "renal cortex".into(),
        "cortex of the kidney".into(),
        "Renal Cortex (human)".into(),
    ]);
    table
}

#[test]
fn models_are_scored_on_id_sets() {
    let dir = tempfile::tempdir().unwrap();
    let synonyms = dir.path().join("uberon.csv");
    fs::write(&synonyms, SYNONYMS).unwrap();
    let index = SynonymIndex::from_csv(&synonyms).unwrap();
    assert_eq!(index.len(), 5);

    let models = vec!["b".to_string(), "a".to_string()];
    let evaluation = evaluate(&index, &predictions(), "answer", &models, "predictions").unwrap();

    let names = evaluation
        .summaries
        .iter()
        .map(|summary| summary.model.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a", "b"]);

    let a = &evaluation.summaries[0];
    assert_eq!((a.tp_total, a.fp_total, a.fn_total), (1, 1, 1));
    assert_eq!(a.micro_p, 0.5);
    assert_eq!(a.n_samples, 2);

    let b = &evaluation.summaries[1];
    assert_eq!((b.tp_total, b.fp_total, b.fn_total), (1, 0, 1));
    assert_eq!(b.micro_p, 1.0);
    assert_eq!(b.micro_r, 0.5);

    let gold = evaluation
        .detailed
        .column("answer_UBERON_IDs", "detailed")
        .unwrap();
    assert_eq!(gold, vec!["UBERON:0002113", "UBERON:0001225"]);

    let out = dir.path().join("eval.csv");
    let summary_path = write_evaluation(&out, &evaluation).unwrap();
    assert!(summary_path.ends_with("eval_summary.csv"));
    let summary = read_csv_table(&summary_path).unwrap();
    assert_eq!(summary.column("model", "summary").unwrap(), vec!["a", "b"]);
    assert_eq!(read_csv_table(&out).unwrap().len(), 2);
}

#[test]
fn missing_model_column_is_reported() {
    let index = SynonymIndex::default();
    let models = vec!["absent".to_string()];
    assert!(evaluate(&index, &predictions(), "answer", &models, "predictions").is_err());
}
