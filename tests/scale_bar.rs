use std::fs;

use assert_matches::assert_matches;

use ftu_miner::error::MinerError;
use ftu_miner::scale_bar::{STANDARD_UNITS, clean_value_file, evaluate_models};
use ftu_miner::sheet::{Table, read_table, write_csv_table, write_xlsx_table};

fn record(value: &str) -> String {
    format!(r#"{{"Descriptor Type": "scale bar", "Value": "{value}", "Units": "μm"}}"#)
}

#[test]
fn models_are_scored_per_descriptor_key() {
    let dir = tempfile::tempdir().unwrap();
    let sample_path = dir.path().join("sample.csv");
    let mut sample = Table::new(["caption", "Answer"]);
    sample.push(vec!["Bar, 50 μm.".into(), record("50")]);
    sample.push(vec!["Bar, 10 μm.".into(), record("10")]);
    write_csv_table(&sample_path, &sample).unwrap();

    let mut responses = Table::new(["content", "response"]);
    responses.push(vec![
        "Bar, 50 μm.".into(),
        format!("```json\n[{}]\n```", record("50")),
    ]);
    responses.push(vec![
        "Bar, 10 μm.".into(),
        format!("The scale bar is {} here.", record("20")),
    ]);
    responses.push(vec!["Not in the sample.".into(), record("1")]);
    write_xlsx_table(&dir.path().join("llama.xlsx"), &responses).unwrap();

    let models = vec!["llama".to_string(), "gemma".to_string()];
    let reports = evaluate_models(&sample_path, dir.path(), &models, dir.path()).unwrap();
    assert_eq!(reports.len(), 2);

    let llama = &reports[0];
    assert_eq!(llama.rows, 2);
    assert_eq!(llama.means["Value"], 0.5);
    assert_eq!(llama.means["Units"], 1.0);
    assert_eq!(llama.means["Panel"], 1.0);

    let written = read_table(llama.output.as_deref().unwrap()).unwrap();
    let value = written.index_of("Value_similarity").unwrap();
    assert_eq!(written.cell(0, value), "1.0");
    assert_eq!(written.cell(1, value), "0.0");
    assert!(written.index_of("response").is_some());

    assert_eq!(reports[1].model, "gemma");
    assert!(reports[1].output.is_none());
}

#[test]
fn values_are_split_and_units_standardized() {
    let dir = tempfile::tempdir().unwrap();
    let units = dir.path().join("units");
    fs::create_dir(&units).unwrap();
    for unit in STANDARD_UNITS {
        let spellings = match unit {
            "mm" => "mm\nMillimeter\n",
            "um" => "μm\nmicron\num\n",
            other => other,
        };
        fs::write(units.join(format!("{unit}.csv")), spellings).unwrap();
    }

    let input = dir.path().join("values.csv");
    let mut table = Table::new(["pmcid", "value", "units"]);
    table.push(vec!["PMC1".into(), "50 μm".into(), String::new()]);
    table.push(vec!["PMC2".into(), "Not provided".into(), "not provided".into()]);
    table.push(vec!["PMC3".into(), "2".into(), "millimeter".into()]);
    write_csv_table(&input, &table).unwrap();

    let output = dir.path().join("clean.csv");
    let report = clean_value_file(&input, &units, &output).unwrap();
    assert_eq!((report.rows, report.standardized), (3, 2));

    let cleaned = read_table(&output).unwrap();
    let column = |name: &str| cleaned.index_of(name).unwrap();
    assert_eq!(cleaned.cell(0, column("value_new")), "50");
    assert_eq!(cleaned.cell(0, column("value_units")), "μm");
    assert_eq!(cleaned.cell(0, column("standard_unit")), "um");
    assert_eq!(cleaned.cell(1, column("value")), "");
    assert_eq!(cleaned.cell(1, column("units")), "");
    assert_eq!(cleaned.cell(1, column("value_units")), "");
    assert_eq!(cleaned.cell(2, column("value_new")), "2");
    assert_eq!(cleaned.cell(2, column("standard_unit")), "mm");
}

#[test]
fn every_unit_list_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("values.csv");
    write_csv_table(&input, &Table::new(["value", "units"])).unwrap();
    assert_matches!(
        clean_value_file(&input, dir.path(), &dir.path().join("out.csv")),
        Err(MinerError::MissingInput(path)) if path.ends_with("m.csv")
    );
}
