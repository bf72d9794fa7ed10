use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::app::{ProgressEvent, ProgressSink};
use crate::clickhouse::{ColumnDef, ColumnStore, Engine, create_table_ddl};
use crate::domain::Pmcid;
use crate::error::MinerError;

pub const INSERT_BATCH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    fn new(name: String, attributes: Vec<(String, String)>) -> Self {
        Self {
            name,
            attributes,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    pub fn find(&self, name: &str) -> Option<&Element> {
        for child in self.elements() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in self.elements() {
            if child.name == name {
                found.push(child);
            }
            child.collect(name, found);
        }
    }

    pub fn raw_text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(text),
                Node::Element(element) => element.push_text(out),
            }
        }
    }

    pub fn text(&self) -> String {
        self.raw_text().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {key}=\"{}\"", escape(value.as_str())));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(&escape(text.as_str())),
                Node::Element(element) => element.write_xml(out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn open_element(start: &BytesStart<'_>, origin: &str) -> Result<Element, MinerError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| xml_error(origin, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attributes.push((key, value));
    }
    Ok(Element::new(name, attributes))
}

fn xml_error(origin: &str, err: impl std::fmt::Display) -> MinerError {
    MinerError::Xml {
        path: origin.to_string(),
        message: err.to_string(),
    }
}

pub fn parse_document(xml: &str, origin: &str) -> Result<Element, MinerError> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Element::new("#document".to_string(), Vec::new())];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(open_element(&start, origin)?),
            Ok(Event::Empty(start)) => {
                let element = open_element(&start, origin)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Element(element));
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(xml_error(origin, "unbalanced closing tag"));
                }
                if let Some(element) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Element(element));
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let text = match text.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(_) => String::from_utf8_lossy(text.as_ref()).into_owned(),
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text));
                }
            }
            Ok(Event::CData(data)) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(xml_error(origin, err)),
        }
    }

    if stack.len() != 1 {
        return Err(xml_error(origin, "unclosed element at end of file"));
    }
    stack
        .pop()
        .ok_or_else(|| xml_error(origin, "empty document"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FigureRow {
    pub pmcid: String,
    pub figid: String,
    pub label: String,
    pub graphic: String,
    pub caption: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublicationSummary {
    pub pmcid: String,
    pub article_title: String,
    pub pmid: String,
    pub doi: String,
    pub abstract_xml: String,
    pub pub_year: String,
    pub journal_title: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParagraphRow {
    pub pmcid: String,
    pub pid: String,
    pub ref_xml: String,
    pub ref_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XrefRow {
    pub pmcid: String,
    pub rid: String,
    pub ref_type: String,
    pub ref_xml: String,
    pub ref_text: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorRow {
    pub pmcid: String,
    pub surname: String,
    pub given_names: String,
    pub email: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SubjectRow {
    pub pmcid: String,
    pub group_type: String,
    pub subject: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Article {
    pub figures: Vec<FigureRow>,
    pub summary: PublicationSummary,
    pub paragraphs: Vec<ParagraphRow>,
    pub xrefs: Vec<XrefRow>,
    pub authors: Vec<AuthorRow>,
    pub subjects: Vec<SubjectRow>,
}

pub fn figures(doc: &Element, pmcid: &str, file_path: &str) -> Vec<FigureRow> {
    doc.find_all("fig")
        .into_iter()
        .map(|fig| FigureRow {
            pmcid: pmcid.to_string(),
            figid: fig.attr("id").unwrap_or_default().to_string(),
            label: fig.find("label").map(Element::text).unwrap_or_default(),
            graphic: fig
                .find("graphic")
                .and_then(|graphic| graphic.attr("xlink:href"))
                .unwrap_or_default()
                .to_string(),
            caption: fig.find("caption").map(Element::text).unwrap_or_default(),
            file_path: file_path.to_string(),
        })
        .collect()
}

pub fn summary(doc: &Element, pmcid: &str, file_path: &str) -> PublicationSummary {
    let article_id = |kind: &str| {
        doc.find_all("article-id")
            .into_iter()
            .find(|element| element.attr("pub-id-type") == Some(kind))
            .map(Element::text)
            .unwrap_or_default()
    };
    let pub_dates = doc.find_all("pub-date");
    let pub_year = ["ppub", "epub", "pmc-release"]
        .iter()
        .find_map(|kind| {
            pub_dates
                .iter()
                .find(|date| date.attr("pub-type") == Some(kind))
                .and_then(|date| date.find("year"))
                .map(Element::text)
        })
        .unwrap_or_default();

    PublicationSummary {
        pmcid: pmcid.to_string(),
        article_title: doc
            .find("title-group")
            .and_then(|group| group.find("article-title"))
            .map(Element::text)
            .unwrap_or_default(),
        pmid: article_id("pmid"),
        doi: article_id("doi"),
        abstract_xml: doc.find("abstract").map(Element::to_xml).unwrap_or_default(),
        pub_year,
        journal_title: doc.find("journal-title").map(Element::text).unwrap_or_default(),
        file_path: file_path.to_string(),
    }
}

pub fn paragraphs(doc: &Element, pmcid: &str) -> Vec<ParagraphRow> {
    let Some(body) = doc.find("body") else {
        return Vec::new();
    };
    body.find_all("p")
        .into_iter()
        .filter_map(|p| {
            let pid = p.attr("id")?;
            pid.starts_with("Par").then(|| ParagraphRow {
                pmcid: pmcid.to_string(),
                pid: pid.to_string(),
                ref_xml: p.to_xml(),
                ref_text: p.text(),
            })
        })
        .collect()
}

pub fn xrefs(doc: &Element, pmcid: &str, file_path: &str) -> Vec<XrefRow> {
    let mut rows = Vec::new();
    for p in doc.find_all("p") {
        let refs = p.find_all("xref");
        if refs.is_empty() {
            continue;
        }
        let ref_xml = p.to_xml();
        let ref_text = p.text();
        for xref in refs {
            rows.push(XrefRow {
                pmcid: pmcid.to_string(),
                rid: xref.attr("rid").unwrap_or_default().to_string(),
                ref_type: xref.attr("ref-type").unwrap_or_default().to_string(),
                ref_xml: ref_xml.clone(),
                ref_text: ref_text.clone(),
                file_path: file_path.to_string(),
            });
        }
    }
    rows
}

pub fn authors(doc: &Element, pmcid: &str, file_path: &str) -> Vec<AuthorRow> {
    doc.find_all("contrib")
        .into_iter()
        .map(|contrib| {
            let name = contrib.find("name");
            let part = |tag: &str| {
                name.and_then(|name| name.find(tag))
                    .map(Element::text)
                    .unwrap_or_default()
            };
            AuthorRow {
                pmcid: pmcid.to_string(),
                surname: part("surname"),
                given_names: part("given-names"),
                email: contrib.find("email").map(Element::text).unwrap_or_default(),
                file_path: file_path.to_string(),
            }
        })
        .collect()
}

pub fn subjects(doc: &Element, pmcid: &str, file_path: &str) -> Vec<SubjectRow> {
    fn walk(group: &Element, group_type: &str, out: &mut BTreeSet<(String, String)>) {
        for child in group.elements() {
            match child.name.as_str() {
                "subject" => {
                    out.insert((group_type.to_string(), child.text()));
                }
                "subj-group" => walk(child, group_type, out),
                _ => {}
            }
        }
    }

    let mut found = BTreeSet::new();
    for group in doc.find_all("subj-group") {
        if let Some(group_type) = group.attr("subj-group-type") {
            walk(group, group_type, &mut found);
        }
    }
    found
        .into_iter()
        .map(|(group_type, subject)| SubjectRow {
            pmcid: pmcid.to_string(),
            group_type,
            subject,
            file_path: file_path.to_string(),
        })
        .collect()
}

pub fn pmcid_for(path: &Path) -> Result<Pmcid, MinerError> {
    path.parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy())
        .unwrap_or_default()
        .parse()
}

pub fn parse_article(xml: &str, pmcid: &str, file_path: &str) -> Result<Article, MinerError> {
    let doc = parse_document(xml, file_path)?;
    Ok(Article {
        figures: figures(&doc, pmcid, file_path),
        summary: summary(&doc, pmcid, file_path),
        paragraphs: paragraphs(&doc, pmcid),
        xrefs: xrefs(&doc, pmcid, file_path),
        authors: authors(&doc, pmcid, file_path),
        subjects: subjects(&doc, pmcid, file_path),
    })
}

pub fn read_article(path: &Path) -> Result<Article, MinerError> {
    let xml = fs::read_to_string(path)
        .map_err(|err| MinerError::Filesystem(format!("{}: {err}", path.display())))?;
    let pmcid = pmcid_for(path)?;
    parse_article(&xml, pmcid.as_str(), &path.display().to_string())
}

pub fn nxml_files(root: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "nxml"))
        .collect::<Vec<_>>();
    files.sort();
    files
}

struct TableSpec {
    name: &'static str,
    columns: &'static [&'static str],
    engine: Engine,
    order_by: &'static [&'static str],
}

fn table_specs() -> Vec<TableSpec> {
    vec![
        TableSpec {
            name: "ftu_pub_pmc",
            columns: &["pmcid", "figid", "label", "graphic", "caption", "file_path"],
            engine: Engine::MergeTree,
            order_by: &["pmcid"],
        },
        TableSpec {
            name: "publication_summary",
            columns: &[
                "pmcid",
                "article_title",
                "pmid",
                "doi",
                "abstract",
                "pub_year",
                "journal_title",
                "file_path",
            ],
            engine: Engine::MergeTree,
            order_by: &["pmcid"],
        },
        TableSpec {
            name: "img_fulltext",
            columns: &["pmcid", "pid", "ref_xml", "ref_text"],
            engine: Engine::ReplacingMergeTree {
                version: "version".to_string(),
            },
            order_by: &["pmcid", "pid"],
        },
        TableSpec {
            name: "image_refs",
            columns: &["pmcid", "rid", "ref_type", "ref_xml", "ref_text", "file_path"],
            engine: Engine::MergeTree,
            order_by: &["pmcid"],
        },
        TableSpec {
            name: "publication_authors",
            columns: &["pmcid", "surname", "given_names", "email", "file_path"],
            engine: Engine::MergeTree,
            order_by: &["pmcid"],
        },
        TableSpec {
            name: "publication_subject",
            columns: &["pmcid", "subject", "group_type", "file_path"],
            engine: Engine::MergeTree,
            order_by: &["pmcid"],
        },
    ]
}

fn ddl(spec: &TableSpec) -> String {
    let mut columns = spec
        .columns
        .iter()
        .map(|column| ColumnDef::string(*column))
        .collect::<Vec<_>>();
    if let Engine::ReplacingMergeTree { version } = &spec.engine {
        columns.push(ColumnDef::new(version.clone(), "DateTime DEFAULT now()"));
    }
    create_table_ddl(
        spec.name,
        &columns,
        &spec.engine,
        &spec.order_by.iter().map(|column| column.to_string()).collect::<Vec<_>>(),
    )
}

fn rows_for(name: &str, articles: &[Article]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for article in articles {
        match name {
            "ftu_pub_pmc" => rows.extend(article.figures.iter().map(|row| {
                vec![
                    row.pmcid.clone(),
                    row.figid.clone(),
                    row.label.clone(),
                    row.graphic.clone(),
                    row.caption.clone(),
                    row.file_path.clone(),
                ]
            })),
            "publication_summary" => {
                let row = &article.summary;
                rows.push(vec![
                    row.pmcid.clone(),
                    row.article_title.clone(),
                    row.pmid.clone(),
                    row.doi.clone(),
                    row.abstract_xml.clone(),
                    row.pub_year.clone(),
                    row.journal_title.clone(),
                    row.file_path.clone(),
                ]);
            }
            "img_fulltext" => rows.extend(article.paragraphs.iter().map(|row| {
                vec![
                    row.pmcid.clone(),
                    row.pid.clone(),
                    row.ref_xml.clone(),
                    row.ref_text.clone(),
                ]
            })),
            "image_refs" => rows.extend(article.xrefs.iter().map(|row| {
                vec![
                    row.pmcid.clone(),
                    row.rid.clone(),
                    row.ref_type.clone(),
                    row.ref_xml.clone(),
                    row.ref_text.clone(),
                    row.file_path.clone(),
                ]
            })),
            "publication_authors" => rows.extend(article.authors.iter().map(|row| {
                vec![
                    row.pmcid.clone(),
                    row.surname.clone(),
                    row.given_names.clone(),
                    row.email.clone(),
                    row.file_path.clone(),
                ]
            })),
            "publication_subject" => rows.extend(article.subjects.iter().map(|row| {
                vec![
                    row.pmcid.clone(),
                    row.subject.clone(),
                    row.group_type.clone(),
                    row.file_path.clone(),
                ]
            })),
            _ => {}
        }
    }
    rows
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractReport {
    pub files: usize,
    pub parsed: usize,
    pub failed: usize,
    pub inserted: Vec<(String, usize)>,
}

pub fn extract_dir(
    root: &Path,
    store: &dyn ColumnStore,
    workers: usize,
    sink: &dyn ProgressSink,
) -> Result<ExtractReport, MinerError> {
    let files = nxml_files(root);
    sink.event(ProgressEvent {
        message: format!("phase=Parse; {} nxml files", files.len()),
        elapsed: None,
    });

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|err| MinerError::ConfigInvalid(err.to_string()))?;
    let results = pool.install(|| {
        files
            .par_iter()
            .map(|path| read_article(path))
            .collect::<Vec<_>>()
    });

    let mut report = ExtractReport {
        files: files.len(),
        ..ExtractReport::default()
    };
    let mut articles = Vec::with_capacity(results.len());
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(article) => articles.push(article),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping article");
                report.failed += 1;
            }
        }
    }
    report.parsed = articles.len();

    for spec in table_specs() {
        store.execute(&ddl(&spec))?;
        let columns = spec
            .columns
            .iter()
            .map(|column| column.to_string())
            .collect::<Vec<_>>();
        let rows = rows_for(spec.name, &articles);
        for chunk in rows.chunks(INSERT_BATCH) {
            store.insert_rows(spec.name, &columns, chunk)?;
        }
        info!(table = spec.name, rows = rows.len(), "records inserted");
        report.inserted.push((spec.name.to_string(), rows.len()));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_keeps_text_and_attributes() {
        let doc = parse_document(r#"<a x="1">hi <b>there</b><c/></a>"#, "t").unwrap();
        let a = doc.find("a").unwrap();
        assert_eq!(a.attr("x"), Some("1"));
        assert_eq!(a.text(), "hi there");
        assert_eq!(a.to_xml(), r#"<a x="1">hi <b>there</b><c/></a>"#);
    }

    #[test]
    fn unbalanced_markup_is_an_error() {
        assert!(parse_document("<a><b></a>", "t").is_err());
    }

    #[test]
    fn pmcid_is_parent_directory() {
        assert_eq!(
            pmcid_for(Path::new("root/pmc123/article.nxml")).unwrap().as_str(),
            "PMC123"
        );
        assert!(matches!(
            pmcid_for(Path::new("root/supplement/article.nxml")),
            Err(MinerError::InvalidPmcid(_))
        ));
        assert!(pmcid_for(Path::new("article.nxml")).is_err());
    }
}
