use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use ftu_miner::clickhouse::{ColumnStore, Row};
use ftu_miner::error::MinerError;
use ftu_miner::nxml::{extract_dir, parse_article};
use ftu_miner::output::JsonOutput;

const ARTICLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE article PUBLIC "-//NLM//DTD JATS (Z39.96) Journal Archiving and Interchange DTD v1.2 20190208//EN" "JATS-archivearticle1.dtd">
<article xmlns:xlink="http://www.w3.org/1999/xlink">
  <front>
    <journal-meta>
      <journal-title-group><journal-title>Kidney International</journal-title></journal-title-group>
    </journal-meta>
    <article-meta>
      <article-id pub-id-type="pmid">30200001</article-id>
      <article-id pub-id-type="doi">10.1000/ki.2018.1</article-id>
      <article-categories>
        <subj-group subj-group-type="heading">
          <subject>Research Article</subject>
          <subj-group><subject>Nephrology</subject></subj-group>
        </subj-group>
        <subj-group subj-group-type="heading"><subject>Research Article</subject></subj-group>
      </article-categories>
      <title-group><article-title>Mapping the   renal corpuscle</article-title></title-group>
      <contrib-group>
        <contrib contrib-type="author">
          <name><surname>Rivera</surname><given-names>Ana</given-names></name>
          <email>ana@example.org</email>
        </contrib>
      </contrib-group>
      <pub-date pub-type="epub"><year>2018</year></pub-date>
      <pub-date pub-type="pmc-release"><year>2019</year></pub-date>
      <abstract><p>Glomeruli &amp; tubules.</p></abstract>
    </article-meta>
  </front>
  <body>
    <p id="Par1">The glomerulus (<xref rid="Fig1" ref-type="fig">Fig. 1</xref>) filters blood.</p>
    <p id="Sec2">Not a numbered paragraph.</p>
    <fig id="Fig1">
      <label>Figure 1</label>
      <caption><p>Structure of the <italic>nephron</italic>.</p></caption>
      <graphic xlink:href="ki-1-f1"/>
    </fig>
  </body>
</article>
"#;

#[derive(Default)]
struct Recorder {
    ddl: Mutex<Vec<String>>,
    rows: Mutex<BTreeMap<String, Vec<Vec<String>>>>,
}

impl ColumnStore for Recorder {
    fn execute(&self, sql: &str) -> Result<(), MinerError> {
        self.ddl.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    fn insert_rows(
        &self,
        table: &str,
        _columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), MinerError> {
        self.rows
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }

    fn select_rows(&self, _sql: &str) -> Result<Vec<Row>, MinerError> {
        Ok(Vec::new())
    }
}

#[test]
fn article_records() {
    let article = parse_article(ARTICLE, "PMC6000001", "pmc/PMC6000001/ki.nxml").unwrap();

    let summary = &article.summary;
    assert_eq!(summary.article_title, "Mapping the renal corpuscle");
    assert_eq!(summary.pmid, "30200001");
    assert_eq!(summary.doi, "10.1000/ki.2018.1");
    assert_eq!(summary.pub_year, "2018");
    assert_eq!(summary.journal_title, "Kidney International");
    assert_eq!(summary.abstract_xml, "<abstract><p>Glomeruli &amp; tubules.</p></abstract>");

    assert_eq!(article.figures.len(), 1);
    let figure = &article.figures[0];
    assert_eq!(figure.figid, "Fig1");
    assert_eq!(figure.label, "Figure 1");
    assert_eq!(figure.graphic, "ki-1-f1");
    assert_eq!(figure.caption, "Structure of the nephron.");

    assert_eq!(article.paragraphs.len(), 1);
    assert_eq!(article.paragraphs[0].pid, "Par1");
    assert_eq!(
        article.paragraphs[0].ref_text,
        "The glomerulus (Fig. 1) filters blood."
    );

    assert_eq!(article.xrefs.len(), 1);
    assert_eq!(article.xrefs[0].rid, "Fig1");
    assert_eq!(article.xrefs[0].ref_type, "fig");
    assert!(article.xrefs[0].ref_xml.starts_with("<p id=\"Par1\">"));

    assert_eq!(article.authors.len(), 1);
    assert_eq!(article.authors[0].surname, "Rivera");
    assert_eq!(article.authors[0].given_names, "Ana");
    assert_eq!(article.authors[0].email, "ana@example.org");

    let subjects = article
        .subjects
        .iter()
        .map(|row| row.subject.as_str())
        .collect::<Vec<_>>();
    assert_eq!(subjects, vec!["Nephrology", "Research Article"]);
}

#[test]
fn directory_extraction_counts_failures() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("PMC6000001");
    let bad = dir.path().join("PMC6000002");
    fs::create_dir_all(&good).unwrap();
    fs::create_dir_all(&bad).unwrap();
    fs::write(good.join("ki.nxml"), ARTICLE).unwrap();
    fs::write(bad.join("broken.nxml"), "<article><body></article>").unwrap();
    fs::write(good.join("ki-1-f1.jpg"), b"not xml").unwrap();

    let store = Recorder::default();
    let report = extract_dir(dir.path(), &store, 2, &JsonOutput).unwrap();
    assert_eq!((report.files, report.parsed, report.failed), (2, 1, 1));

    let inserted = report.inserted.into_iter().collect::<BTreeMap<_, _>>();
    assert_eq!(inserted["ftu_pub_pmc"], 1);
    assert_eq!(inserted["publication_summary"], 1);
    assert_eq!(inserted["img_fulltext"], 1);
    assert_eq!(inserted["image_refs"], 1);
    assert_eq!(inserted["publication_authors"], 1);
    assert_eq!(inserted["publication_subject"], 2);

    let ddl = store.ddl.lock().unwrap();
    assert_eq!(ddl.len(), 6);
    assert!(ddl.iter().any(|sql| sql.contains("ReplacingMergeTree(`version`)")));

    let rows = store.rows.lock().unwrap();
    assert_eq!(rows["ftu_pub_pmc"][0][0], "PMC6000001");
}

#[test]
fn articles_outside_a_pmcid_directory_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let stray = dir.path().join("supplementary");
    fs::create_dir_all(&stray).unwrap();
    fs::write(stray.join("ki.nxml"), ARTICLE).unwrap();

    let store = Recorder::default();
    let report = extract_dir(dir.path(), &store, 1, &JsonOutput).unwrap();
    assert_eq!((report.files, report.parsed, report.failed), (1, 0, 1));
    assert!(store.rows.lock().unwrap().is_empty());
}
