//! Matrix sources and validation of the raw nested codex into typed columns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use log::debug;
use serde_json::Value;

use crate::conf::{C_KEY_SUBTECHS, C_KEY_TACTIC};
use crate::spec::{
    EnumMatrixDomain, MatrixTemplateError, SpecMatrixColumn, SpecRawColumn,
    SpecSubtechniqueEntry, SpecTechniqueEntry,
};
use crate::util::convert_json_scalar_to_str;

////////////////////////////////////////////////////////////////////////////////
// #region Sources

/// Supplier of the raw nested tactic/technique codex for one domain.
pub trait MatrixSource {
    /// Load the raw columns of `domain`, left to right.
    ///
    /// `if_fresh` asks the source to bypass any cache it keeps.
    fn load_matrix(
        &self,
        domain: EnumMatrixDomain,
        if_fresh: bool,
    ) -> Result<Vec<SpecRawColumn>, MatrixTemplateError>;
}

/// Reads `<dir>/<domain>.json`, caching file text per domain.
#[derive(Debug)]
pub struct JsonMatrixSource {
    dir_root: PathBuf,
    dict_cache: Mutex<BTreeMap<EnumMatrixDomain, String>>,
}

impl JsonMatrixSource {
    pub fn new(dir_root: impl Into<PathBuf>) -> Self {
        Self {
            dir_root: dir_root.into(),
            dict_cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Directory holding the per-domain JSON files.
    pub fn dir_root(&self) -> &Path {
        &self.dir_root
    }

    /// File backing `domain`.
    pub fn derive_domain_path(&self, domain: EnumMatrixDomain) -> PathBuf {
        self.dir_root.join(format!("{}.json", domain.as_str()))
    }

    fn read_domain_text(
        &self,
        domain: EnumMatrixDomain,
        if_fresh: bool,
    ) -> Result<String, MatrixTemplateError> {
        let mut dict_cache = self
            .dict_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !if_fresh && let Some(c_text) = dict_cache.get(&domain) {
            return Ok(c_text.clone());
        }

        let path_file = self.derive_domain_path(domain);
        let c_text = std::fs::read_to_string(&path_file).map_err(|err| {
            MatrixTemplateError::Source {
                domain,
                message: format!("cannot read {}: {err}", path_file.display()),
            }
        })?;
        debug!(
            "matrix source: read {} ({} bytes, fresh={if_fresh})",
            path_file.display(),
            c_text.len()
        );
        dict_cache.insert(domain, c_text.clone());
        Ok(c_text)
    }
}

impl MatrixSource for JsonMatrixSource {
    fn load_matrix(
        &self,
        domain: EnumMatrixDomain,
        if_fresh: bool,
    ) -> Result<Vec<SpecRawColumn>, MatrixTemplateError> {
        let c_text = self.read_domain_text(domain, if_fresh)?;
        Ok(serde_json::from_str::<Vec<SpecRawColumn>>(&c_text)?)
    }
}

/// Process-wide JSON source for `dir_root`.
///
/// Engines built over the same directory share one text cache, so a later
/// non-fresh load reuses what an earlier load read.
pub fn derive_shared_json_source(dir_root: impl Into<PathBuf>) -> Arc<JsonMatrixSource> {
    static DICT_SOURCES: OnceLock<Mutex<BTreeMap<PathBuf, Arc<JsonMatrixSource>>>> =
        OnceLock::new();

    let path_root = dir_root.into();
    let mut dict_sources = DICT_SOURCES
        .get_or_init(|| Mutex::new(BTreeMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(
        dict_sources
            .entry(path_root.clone())
            .or_insert_with(|| Arc::new(JsonMatrixSource::new(path_root))),
    )
}

/// In-memory raw columns per domain.
#[derive(Debug, Clone, Default)]
pub struct StaticMatrixSource {
    dict_columns: BTreeMap<EnumMatrixDomain, Vec<SpecRawColumn>>,
}

impl StaticMatrixSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the raw columns served for `domain`.
    pub fn with_domain(mut self, domain: EnumMatrixDomain, columns: Vec<SpecRawColumn>) -> Self {
        self.dict_columns.insert(domain, columns);
        self
    }
}

impl MatrixSource for StaticMatrixSource {
    fn load_matrix(
        &self,
        domain: EnumMatrixDomain,
        _if_fresh: bool,
    ) -> Result<Vec<SpecRawColumn>, MatrixTemplateError> {
        self.dict_columns
            .get(&domain)
            .cloned()
            .ok_or_else(|| MatrixTemplateError::Source {
                domain,
                message: "domain not registered".to_string(),
            })
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CodexValidation

/// Validate raw codex columns into typed matrix columns.
///
/// Every column needs exactly one `tactic` entry; `subtechs` groups must be keyed
/// by the ID (or, failing that, the name) of a technique in the same column.
pub fn parse_matrix_columns(
    raw_columns: &[SpecRawColumn],
) -> Result<Vec<SpecMatrixColumn>, MatrixTemplateError> {
    raw_columns
        .iter()
        .enumerate()
        .map(|(n_idx_col, raw_column)| parse_matrix_column(n_idx_col, raw_column))
        .collect()
}

fn parse_matrix_column(
    n_idx_col: usize,
    raw_column: &[Value],
) -> Result<SpecMatrixColumn, MatrixTemplateError> {
    let mut c_tactic: Option<String> = None;
    let mut l_techniques: Vec<SpecTechniqueEntry> = Vec::new();
    let mut l_groups: Vec<(String, Vec<SpecSubtechniqueEntry>)> = Vec::new();

    for (n_idx_entry, raw_entry) in raw_column.iter().enumerate() {
        let Some(dict_entry) = raw_entry.as_object() else {
            return Err(create_structural_error(
                n_idx_col,
                n_idx_entry,
                "entry is not an object",
            ));
        };

        for (c_key, value) in dict_entry {
            if c_key == C_KEY_TACTIC {
                let Some(c_name) = value.as_str() else {
                    return Err(create_structural_error(
                        n_idx_col,
                        n_idx_entry,
                        "tactic name is not a string",
                    ));
                };
                if let Some(c_existing) = &c_tactic {
                    return Err(create_structural_error(
                        n_idx_col,
                        n_idx_entry,
                        &format!("second tactic {c_name:?} after {c_existing:?}"),
                    ));
                }
                c_tactic = Some(c_name.to_string());
            } else if c_key == C_KEY_SUBTECHS {
                l_groups.extend(parse_subtechnique_groups(n_idx_col, n_idx_entry, value)?);
            } else {
                let Some(c_id) = convert_json_scalar_to_str(value) else {
                    return Err(create_structural_error(
                        n_idx_col,
                        n_idx_entry,
                        &format!("technique {c_key:?} has a non-scalar identifier"),
                    ));
                };
                l_techniques.push(SpecTechniqueEntry {
                    name: c_key.clone(),
                    id: c_id,
                    subtechniques: Vec::new(),
                });
            }
        }
    }

    let Some(c_tactic) = c_tactic else {
        return Err(MatrixTemplateError::Structural(format!(
            "column {n_idx_col} has no tactic entry"
        )));
    };

    for (c_technique_key, l_subtechniques) in l_groups {
        let n_idx_technique = l_techniques
            .iter()
            .position(|t| t.id == c_technique_key)
            .or_else(|| l_techniques.iter().position(|t| t.name == c_technique_key));
        let Some(technique) = n_idx_technique.and_then(|n_idx| l_techniques.get_mut(n_idx))
        else {
            return Err(MatrixTemplateError::Structural(format!(
                "column {n_idx_col} ({c_tactic}): sub-techniques reference unknown technique {c_technique_key:?}"
            )));
        };
        technique.subtechniques.extend(l_subtechniques);
    }

    Ok(SpecMatrixColumn {
        tactic: c_tactic,
        techniques: l_techniques,
    })
}

fn parse_subtechnique_groups(
    n_idx_col: usize,
    n_idx_entry: usize,
    value: &Value,
) -> Result<Vec<(String, Vec<SpecSubtechniqueEntry>)>, MatrixTemplateError> {
    let Some(dict_groups) = value.as_object() else {
        return Err(create_structural_error(
            n_idx_col,
            n_idx_entry,
            "subtechs is not an object",
        ));
    };

    let mut l_groups = Vec::with_capacity(dict_groups.len());
    for (c_technique_key, raw_subtechniques) in dict_groups {
        let Some(l_raw_subtechniques) = raw_subtechniques.as_array() else {
            return Err(create_structural_error(
                n_idx_col,
                n_idx_entry,
                &format!("sub-techniques of {c_technique_key:?} are not a list"),
            ));
        };

        let mut l_subtechniques = Vec::with_capacity(l_raw_subtechniques.len());
        for raw_subtechnique in l_raw_subtechniques {
            let Some(dict_subtechnique) = raw_subtechnique.as_object() else {
                return Err(create_structural_error(
                    n_idx_col,
                    n_idx_entry,
                    &format!("sub-technique of {c_technique_key:?} is not an object"),
                ));
            };
            for (c_name, raw_id) in dict_subtechnique {
                let Some(c_id) = convert_json_scalar_to_str(raw_id) else {
                    return Err(create_structural_error(
                        n_idx_col,
                        n_idx_entry,
                        &format!("sub-technique {c_name:?} has a non-scalar identifier"),
                    ));
                };
                l_subtechniques.push(SpecSubtechniqueEntry {
                    name: c_name.clone(),
                    id: c_id,
                });
            }
        }
        l_groups.push((c_technique_key.clone(), l_subtechniques));
    }
    Ok(l_groups)
}

fn create_structural_error(n_idx_col: usize, n_idx_entry: usize, msg: &str) -> MatrixTemplateError {
    MatrixTemplateError::Structural(format!("column {n_idx_col} entry {n_idx_entry}: {msg}"))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
