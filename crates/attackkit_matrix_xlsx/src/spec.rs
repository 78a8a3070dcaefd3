//! Matrix models, export options and top-level error type.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use crate::util::format_cell_label;

////////////////////////////////////////////////////////////////////////////////
// #region DomainAndMatrix

/// Matrix domain served by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnumMatrixDomain {
    /// Broad enterprise scope.
    Enterprise,
    /// Narrower mobile scope.
    Mobile,
}

impl EnumMatrixDomain {
    /// Every accepted domain, in declaration order.
    pub const ALL: [Self; 2] = [Self::Enterprise, Self::Mobile];

    /// Canonical lowercase domain name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enterprise => "enterprise",
            Self::Mobile => "mobile",
        }
    }
}

impl fmt::Display for EnumMatrixDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of the raw nested codex, as supplied by a matrix source.
///
/// Each item is a JSON object: `{"tactic": ..}`, `{"<name>": "<id>"}` or
/// `{"subtechs": {"<technique>": [{"<name>": "<id>"}, ..]}}`.
pub type SpecRawColumn = Vec<serde_json::Value>;

/// Sub-technique record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSubtechniqueEntry {
    /// Display name.
    pub name: String,
    /// Identifier, e.g. `T1078.001`.
    pub id: String,
}

/// Technique with its ordered sub-techniques (empty for flat techniques).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTechniqueEntry {
    /// Display name.
    pub name: String,
    /// Identifier, e.g. `T1078`.
    pub id: String,
    /// Ordered sub-techniques.
    pub subtechniques: Vec<SpecSubtechniqueEntry>,
}

/// One tactic column of the validated matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMatrixColumn {
    /// Tactic display name (row 1 header).
    pub tactic: String,
    /// Ordered techniques, top to bottom.
    pub techniques: Vec<SpecTechniqueEntry>,
}

/// Borrowed view of one matrix node, visited tactic -> technique -> sub-technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumMatrixNode<'a> {
    /// Tactic column header.
    Tactic(&'a SpecMatrixColumn),
    /// Technique inside a tactic.
    Technique(&'a SpecTechniqueEntry),
    /// Sub-technique inside a technique.
    Subtechnique(&'a SpecSubtechniqueEntry),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TemplateModels

/// 1-based `(row, column)` grid position; row 1 holds tactic headers.
///
/// Ordering is row-major, which is the template iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecGridCoord {
    /// 1-based row.
    pub row: usize,
    /// 1-based column.
    pub col: usize,
}

impl SpecGridCoord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// What a template cell represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumTemplateCellKind {
    Tactic,
    Technique,
    Subtechnique,
}

/// One populated template cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTemplateCell {
    /// Display name; this is the label coordinate lookup matches against.
    pub name: String,
    /// Identifier; `None` for tactic headers.
    pub id: Option<String>,
    /// Cell role.
    pub kind: EnumTemplateCellKind,
}

/// Vertical merge of `span` rows starting at `row_start` in technique column `col`.
///
/// Every instruction implies a header merge of row 1 across `col` and `col + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecMergeInstruction {
    /// First merged row (the technique row).
    pub row_start: usize,
    /// Technique column.
    pub col: usize,
    /// Number of visible sub-techniques.
    pub span: usize,
}

impl SpecMergeInstruction {
    /// Last merged row (inclusive).
    pub fn row_end(&self) -> usize {
        self.row_start + self.span.saturating_sub(1)
    }
}

/// Which parts of an entry appear in rendered labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecLabelPolicy {
    /// Show the human-readable name.
    pub if_show_name: bool,
    /// Show the identifier.
    pub if_show_id: bool,
}

impl Default for SpecLabelPolicy {
    fn default() -> Self {
        Self {
            if_show_name: true,
            if_show_id: false,
        }
    }
}

/// Per-export options. Not persisted between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMatrixExportOptions {
    /// Show names in rendered labels.
    pub if_show_name: bool,
    /// Show identifiers in rendered labels.
    pub if_show_id: bool,
    /// Technique IDs whose sub-techniques are expanded into visible rows.
    pub subtechs: BTreeSet<String>,
    /// Technique or sub-technique IDs omitted entirely.
    pub exclude: BTreeSet<String>,
}

impl Default for SpecMatrixExportOptions {
    fn default() -> Self {
        Self {
            if_show_name: true,
            if_show_id: false,
            subtechs: BTreeSet::new(),
            exclude: BTreeSet::new(),
        }
    }
}

impl SpecMatrixExportOptions {
    pub fn label_policy(&self) -> SpecLabelPolicy {
        SpecLabelPolicy {
            if_show_name: self.if_show_name,
            if_show_id: self.if_show_id,
        }
    }
}

/// Built layout: sparse template, merge list and non-fatal warnings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecMatrixLayout {
    /// Sparse coordinate -> cell mapping.
    pub template: BTreeMap<SpecGridCoord, SpecTemplateCell>,
    /// Vertical merges for expanded techniques, in build order.
    pub merges: Vec<SpecMergeInstruction>,
    /// Label policy captured at build time.
    pub label_policy: SpecLabelPolicy,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecMatrixLayout {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }

    /// Rendered label for one coordinate, following the label policy.
    ///
    /// Row 1 is always the bare tactic name.
    pub fn derive_cell_label(&self, coord: SpecGridCoord) -> Option<String> {
        let cell = self.template.get(&coord)?;
        if coord.row == 1 {
            return Some(cell.name.clone());
        }
        Some(format_cell_label(
            &cell.name,
            cell.id.as_deref(),
            &self.label_policy,
        ))
    }

    /// Rendered labels for every populated coordinate.
    pub fn labels(&self) -> BTreeMap<SpecGridCoord, String> {
        self.template
            .keys()
            .filter_map(|coord| Some((*coord, self.derive_cell_label(*coord)?)))
            .collect()
    }

    /// Header label of a 1-based column, if that column has one.
    pub fn header(&self, col: usize) -> Option<&str> {
        self.template
            .get(&SpecGridCoord::new(1, col))
            .map(|cell| cell.name.as_str())
    }

    /// Highest occupied row (0 when empty).
    pub fn height(&self) -> usize {
        self.template.keys().map(|c| c.row).max().unwrap_or(0)
    }

    /// Highest occupied column (0 when empty).
    pub fn width(&self) -> usize {
        self.template.keys().map(|c| c.col).max().unwrap_or(0)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RenderSpecification

/// Cell format specification consumed by the workbook writer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Border style for all sides.
    pub border: Option<i64>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Top border override.
    pub top: Option<i64>,
    /// Bottom border override.
    pub bottom: Option<i64>,

    /// Background fill color.
    pub bg_color: Option<String>,
    /// Font color.
    pub font_color: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            border: other.border.or(self.border),
            text_wrap: other.text_wrap.or(self.text_wrap),
            top: other.top.or(self.top),
            bottom: other.bottom.or(self.bottom),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
            font_color: other.font_color.clone().or_else(|| self.font_color.clone()),
        }
    }
}

/// Column width autofit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecAutofitCellsPolicy {
    /// Disable width inference entirely.
    pub if_enabled: bool,
    /// Minimum final width.
    pub width_cell_min: usize,
    /// Maximum final width.
    pub width_cell_max: usize,
    /// Width padding added after inference.
    pub width_cell_padding: usize,
}

impl Default for SpecAutofitCellsPolicy {
    fn default() -> Self {
        Self {
            if_enabled: true,
            width_cell_min: 1,
            width_cell_max: 255,
            width_cell_padding: 0,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Engine, source and writer failures.
///
/// "Not found" is never an error: lookups return `Option` or an empty `Vec`.
#[derive(Debug, Error)]
pub enum MatrixTemplateError {
    /// Domain outside the accepted set, after prefix stripping.
    #[error("Invalid domain: `{0}`. Expected one of: ['enterprise', 'mobile']")]
    InvalidDomain(String),
    /// Matrix data violates the expected codex shape.
    #[error("Malformed matrix data: {0}")]
    Structural(String),
    /// Matrix source could not supply a domain.
    #[error("Matrix source failed for `{domain}`: {message}")]
    Source {
        /// Requested domain.
        domain: EnumMatrixDomain,
        /// Source-specific reason.
        message: String,
    },
    /// Built layout does not fit into one worksheet.
    #[error("Layout exceeds Excel limit: {0}")]
    LayoutOverflow(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("XLSX write error: {0}")]
    XlsxWrite(#[from] rust_xlsxwriter::XlsxError),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn create_layout(policy: SpecLabelPolicy) -> SpecMatrixLayout {
        let mut layout = SpecMatrixLayout {
            label_policy: policy,
            ..Default::default()
        };
        layout.template.insert(
            SpecGridCoord::new(1, 1),
            SpecTemplateCell {
                name: "Execution".to_string(),
                id: None,
                kind: EnumTemplateCellKind::Tactic,
            },
        );
        layout.template.insert(
            SpecGridCoord::new(2, 1),
            SpecTemplateCell {
                name: "Command and Scripting Interpreter".to_string(),
                id: Some("T1059".to_string()),
                kind: EnumTemplateCellKind::Technique,
            },
        );
        layout
    }

    #[test]
    fn header_label_ignores_label_policy() {
        let layout = create_layout(SpecLabelPolicy {
            if_show_name: false,
            if_show_id: true,
        });
        assert_eq!(
            layout.derive_cell_label(SpecGridCoord::new(1, 1)).as_deref(),
            Some("Execution")
        );
        assert_eq!(
            layout.derive_cell_label(SpecGridCoord::new(2, 1)).as_deref(),
            Some("T1059")
        );
        assert_eq!(layout.derive_cell_label(SpecGridCoord::new(3, 1)), None);
    }

    #[test]
    fn layout_extent_and_header() {
        let layout = create_layout(SpecLabelPolicy::default());
        assert_eq!(layout.height(), 2);
        assert_eq!(layout.width(), 1);
        assert_eq!(layout.header(1), Some("Execution"));
        assert_eq!(layout.header(2), None);
        assert_eq!(SpecMatrixLayout::default().height(), 0);
    }

    #[test]
    fn merge_instruction_row_end_is_inclusive() {
        let merge = SpecMergeInstruction {
            row_start: 4,
            col: 3,
            span: 3,
        };
        assert_eq!(merge.row_end(), 6);
    }

    #[test]
    fn grid_coords_iterate_row_major() {
        let mut l_coords = vec![
            SpecGridCoord::new(2, 1),
            SpecGridCoord::new(1, 3),
            SpecGridCoord::new(1, 1),
        ];
        l_coords.sort();
        assert_eq!(
            l_coords,
            vec![
                SpecGridCoord::new(1, 1),
                SpecGridCoord::new(1, 3),
                SpecGridCoord::new(2, 1)
            ]
        );
    }

    #[test]
    fn cell_format_merge_prefers_right_side() {
        let base = SpecCellFormat {
            font_name: Some("Calibri".to_string()),
            bold: Some(false),
            ..Default::default()
        };
        let merged = base.with_(SpecCellFormat {
            bold: Some(true),
            ..Default::default()
        });
        assert_eq!(merged.font_name.as_deref(), Some("Calibri"));
        assert_eq!(merged.bold, Some(true));
    }
}
