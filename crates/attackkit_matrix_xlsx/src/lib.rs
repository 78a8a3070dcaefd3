//! `attackkit_matrix_xlsx` v1:
//! ATT&CK matrix layout engine and XLSX renderer.
//!
//! Module layout:
//! - `conf`   : constants, tactic tables and default presets
//! - `spec`   : domain models, options and the crate error
//! - `util`   : pure helper functions
//! - `source` : matrix sources (JSON codex files, in-memory)
//! - `layout` : template construction and ID/coordinate lookups
//! - `writer` : `rust_xlsxwriter`-backed worksheet renderer
pub mod conf;
pub mod layout;
pub mod source;
pub mod spec;
pub mod util;
pub mod writer;

pub use conf::{
    C_DOMAIN_PREFIX, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    TUP_DOMAINS, TUP_EXCEL_ILLEGAL, TUP_TACTIC_IDS, TUP_TACTIC_SHORT_FORMS,
};
pub use layout::{MatrixTemplates, walk_matrix};
pub use source::{
    JsonMatrixSource, MatrixSource, StaticMatrixSource, derive_shared_json_source,
    parse_matrix_columns,
};
pub use spec::{
    EnumMatrixDomain, EnumMatrixNode, EnumTemplateCellKind, MatrixTemplateError,
    SpecAutofitCellsPolicy, SpecCellFormat, SpecGridCoord, SpecLabelPolicy, SpecMatrixColumn,
    SpecMatrixExportOptions, SpecMatrixLayout, SpecMergeInstruction, SpecRawColumn,
    SpecSubtechniqueEntry, SpecTechniqueEntry, SpecTemplateCell,
};
pub use util::{format_cell_label, normalize_domain, plan_header_spans, sanitize_sheet_name};
pub use writer::MatrixXlsxWriter;
