use std::collections::HashMap;

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::batch::LABEL_COLUMN;
use crate::domain::{OTHERS, TagDomain};
use crate::error::MinerError;
use crate::sheet::{Table, read_csv_table, read_xlsx_table, write_csv_table, write_xlsx_table};
use crate::store::Store;

pub const TAG_COLUMN: &str = "tag";

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeReport {
    pub domain: String,
    pub agreement_files: usize,
    pub agreed_rows: usize,
    pub rows: usize,
    pub tagged: usize,
    pub defaulted: usize,
    pub output: String,
}

pub fn finalize(
    store: &Store,
    domain: TagDomain,
    master: Option<&Utf8Path>,
) -> Result<FinalizeReport, MinerError> {
    let files = store.agreement_files(domain)?;
    if files.is_empty() {
        return Err(MinerError::NothingToMerge(store.domain_dir(domain).into()));
    }

    let mut merged = Table::new([domain.key(), LABEL_COLUMN]);
    for path in &files {
        merged.append(&read_xlsx_table(path.as_std_path())?);
    }
    write_xlsx_table(store.merge_all_xlsx(domain).as_std_path(), &merged)?;
    write_csv_table(store.merge_all_csv(domain).as_std_path(), &merged)?;

    let master = master
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|| store.master_csv(domain));
    let mut table = read_csv_table(master.as_std_path())?;
    let (tagged, defaulted) = apply_tags(&mut table, &merged, domain, master.as_str())?;

    let output = store.with_tags(domain);
    write_csv_table(output.as_std_path(), &table)?;
    info!(%domain, rows = table.len(), tagged, defaulted, output = %output, "tags written");

    Ok(FinalizeReport {
        domain: domain.key().to_string(),
        agreement_files: files.len(),
        agreed_rows: merged.len(),
        rows: table.len(),
        tagged,
        defaulted,
        output: output.to_string(),
    })
}

pub fn apply_tags(
    master: &mut Table,
    agreed: &Table,
    domain: TagDomain,
    source_name: &str,
) -> Result<(usize, usize), MinerError> {
    let item_index = master.require_column(domain.key(), source_name)?;
    let agreed_items = agreed.column(domain.key(), "merge-all")?;
    let agreed_labels = agreed.column(LABEL_COLUMN, "merge-all")?;
    let lookup = agreed_items
        .into_iter()
        .zip(agreed_labels)
        .filter(|(_, labels)| !labels.is_empty())
        .collect::<HashMap<_, _>>();

    let tag_index = match master.index_of(TAG_COLUMN) {
        Some(index) => index,
        None => {
            master.headers.push(TAG_COLUMN.to_string());
            master.headers.len() - 1
        }
    };

    let (mut tagged, mut defaulted) = (0, 0);
    for row in &mut master.rows {
        row.resize(row.len().max(tag_index + 1), String::new());
        let tag = match row.get(item_index).and_then(|item| lookup.get(item)) {
            Some(labels) => {
                tagged += 1;
                labels.clone()
            }
            None => {
                defaulted += 1;
                OTHERS.to_string()
            }
        };
        row[tag_index] = tag;
    }
    Ok((tagged, defaulted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_rows_default_to_others() {
        let mut master = Table::new(["id", "sex"]);
        master.push(vec!["1".into(), "F".into()]);
        master.push(vec!["2".into(), "unknown".into()]);
        let mut agreed = Table::new(["sex", "json_rs"]);
        agreed.push(vec!["F".into(), "[\"female\"]".into()]);

        let (tagged, defaulted) = apply_tags(&mut master, &agreed, TagDomain::Sex, "sex.csv").unwrap();
        assert_eq!((tagged, defaulted), (1, 1));
        assert_eq!(master.headers, vec!["id", "sex", "tag"]);
        assert_eq!(master.rows[0][2], "[\"female\"]");
        assert_eq!(master.rows[1][2], "others");
    }
}
