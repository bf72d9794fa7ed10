use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{RoundNumber, TagDomain};
use crate::error::MinerError;

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn domain_dir(&self, domain: TagDomain) -> Utf8PathBuf {
        self.root.join("donor-meta").join(domain.key())
    }

    pub fn round_file(&self, domain: TagDomain) -> Utf8PathBuf {
        self.domain_dir(domain).join("round.csv")
    }

    pub fn master_csv(&self, domain: TagDomain) -> Utf8PathBuf {
        self.domain_dir(domain).join(format!("{}.csv", domain.key()))
    }

    pub fn round_input(&self, domain: TagDomain, round: RoundNumber) -> Utf8PathBuf {
        self.domain_dir(domain)
            .join(format!("{}_{round}.csv", domain.key()))
    }

    pub fn round_pairs(&self, domain: TagDomain, round: RoundNumber) -> Utf8PathBuf {
        self.domain_dir(domain)
            .join(format!("{}_{round}.xlsx", domain.key()))
    }

    pub fn batch_dir(&self, domain: TagDomain, round: RoundNumber) -> Utf8PathBuf {
        self.domain_dir(domain)
            .join(format!("{}_{round}", domain.key()))
    }

    pub fn batch_file(&self, domain: TagDomain, round: RoundNumber, index: usize) -> Utf8PathBuf {
        self.batch_dir(domain, round)
            .join(format!("results_batch_{index}.xlsx"))
    }

    pub fn merged(&self, domain: TagDomain, round: RoundNumber) -> Utf8PathBuf {
        self.domain_dir(domain)
            .join(format!("merged_{}_{round}.xlsx", domain.key()))
    }

    pub fn same(&self, domain: TagDomain, round: RoundNumber) -> Utf8PathBuf {
        self.domain_dir(domain).join(format!("same_{round}.xlsx"))
    }

    pub fn same_others(&self, domain: TagDomain, round: RoundNumber) -> Utf8PathBuf {
        self.domain_dir(domain)
            .join(format!("same-others_{round}.xlsx"))
    }

    pub fn merge_all_xlsx(&self, domain: TagDomain) -> Utf8PathBuf {
        self.domain_dir(domain).join("merge-all.xlsx")
    }

    pub fn merge_all_csv(&self, domain: TagDomain) -> Utf8PathBuf {
        self.domain_dir(domain).join("merge-all.csv")
    }

    pub fn with_tags(&self, domain: TagDomain) -> Utf8PathBuf {
        self.domain_dir(domain)
            .join(format!("{}_with_tags.csv", domain.key()))
    }

    pub fn ensure_domain_dir(&self, domain: TagDomain) -> Result<(), MinerError> {
        fs::create_dir_all(self.domain_dir(domain).as_std_path())
            .map_err(|err| MinerError::Filesystem(err.to_string()))
    }

    pub fn agreement_files(&self, domain: TagDomain) -> Result<Vec<Utf8PathBuf>, MinerError> {
        let dir = self.domain_dir(domain);
        let mut files = list_files(&dir)?
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?;
                let stem = name.strip_suffix(".xlsx")?;
                let round = stem
                    .strip_prefix("same_")
                    .or_else(|| stem.strip_prefix("same-others_"))
                    .or_else(|| stem.strip_prefix("same-"))?;
                let round = round.parse::<RoundNumber>().unwrap_or(RoundNumber::MAX);
                Some((round, name.to_string(), path))
            })
            .collect::<Vec<_>>();
        files.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        Ok(files.into_iter().map(|(_, _, path)| path).collect())
    }
}

pub fn batch_files(dir: &Utf8Path) -> Result<Vec<(usize, Utf8PathBuf)>, MinerError> {
    let mut files = list_files(dir)?
        .into_iter()
        .filter_map(|path| {
            let index = path
                .file_name()?
                .strip_prefix("results_batch_")?
                .strip_suffix(".xlsx")?
                .parse::<usize>()
                .ok()?;
            Some((index, path))
        })
        .collect::<Vec<_>>();
    files.sort_by_key(|(index, _)| *index);
    Ok(files)
}

fn list_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, MinerError> {
    if !dir.as_std_path().is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir.as_std_path())
        .map_err(|err| MinerError::Filesystem(err.to_string()))?
    {
        let entry = entry.map_err(|err| MinerError::Filesystem(err.to_string()))?;
        if !entry.path().is_file() {
            continue;
        }
        if let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new("data");
        assert!(store
            .round_input(TagDomain::Age, 2)
            .ends_with("donor-meta/age/age_2.csv"));
        assert!(store
            .batch_file(TagDomain::Sex, 0, 3)
            .ends_with("donor-meta/sex/sex_0/results_batch_3.xlsx"));
        assert!(store
            .merged(TagDomain::Bmi, 1)
            .ends_with("donor-meta/bmi/merged_bmi_1.xlsx"));
        assert!(store
            .with_tags(TagDomain::Species)
            .ends_with("donor-meta/species/species_with_tags.csv"));
    }
}
