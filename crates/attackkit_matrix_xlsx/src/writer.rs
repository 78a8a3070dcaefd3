//! Workbook writer that renders a built matrix layout through `rust_xlsxwriter`.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook};

use crate::conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, derive_default_autofit_policy, derive_default_matrix_formats,
};
use crate::spec::{
    MatrixTemplateError, SpecAutofitCellsPolicy, SpecCellFormat, SpecGridCoord,
    SpecMatrixLayout, SpecMergeInstruction,
};
use crate::util::{
    cast_col_num, cast_row_num, plan_column_widths, plan_header_spans, sanitize_sheet_name,
};

/// Stateful workbook writer; one worksheet per written layout.
///
/// The workbook stays in memory. Use [`Self::save_to_buffer`] or
/// [`Self::into_workbook`] to hand it on.
pub struct MatrixXlsxWriter {
    workbook: Workbook,
    fmt_header: SpecCellFormat,
    fmt_body: SpecCellFormat,
    fmt_merged: SpecCellFormat,
    policy_autofit: SpecAutofitCellsPolicy,
    set_sheet_names_existing: BTreeSet<String>,
    l_sheet_names: Vec<String>,
}

impl Default for MatrixXlsxWriter {
    fn default() -> Self {
        let dict_fmt = derive_default_matrix_formats();
        Self::new(
            dict_fmt.get("header").cloned().unwrap_or_default(),
            dict_fmt.get("body").cloned().unwrap_or_default(),
            dict_fmt.get("merged").cloned().unwrap_or_default(),
            derive_default_autofit_policy(),
        )
    }
}

impl MatrixXlsxWriter {
    /// Create a writer with explicit header/body/merged formats and autofit policy.
    pub fn new(
        fmt_header: SpecCellFormat,
        fmt_body: SpecCellFormat,
        fmt_merged: SpecCellFormat,
        policy_autofit: SpecAutofitCellsPolicy,
    ) -> Self {
        Self {
            workbook: Workbook::new(),
            fmt_header,
            fmt_body,
            fmt_merged,
            policy_autofit,
            set_sheet_names_existing: BTreeSet::new(),
            l_sheet_names: Vec::new(),
        }
    }

    /// Names of the worksheets written so far, in order.
    pub fn sheet_names(&self) -> &[String] {
        &self.l_sheet_names
    }

    /// Render `layout` into a new worksheet and return the sheet's final name.
    ///
    /// Header cells of expanded tactics are merged across the technique and
    /// sub-technique columns; technique cells with several visible
    /// sub-techniques are merged down over them.
    pub fn write_sheet(
        &mut self,
        layout: &SpecMatrixLayout,
        sheet_name: &str,
    ) -> Result<String, MatrixTemplateError> {
        if self.policy_autofit.width_cell_max < self.policy_autofit.width_cell_min {
            return Err(MatrixTemplateError::LayoutOverflow(
                "policy_autofit.width_cell_max must be >= policy_autofit.width_cell_min."
                    .to_string(),
            ));
        }

        let dict_labels = layout.labels();
        let set_header_span_cols = plan_header_spans(&layout.merges);
        let dict_vertical_merges: BTreeMap<SpecGridCoord, &SpecMergeInstruction> = layout
            .merges
            .iter()
            .filter(|merge| merge.span > 1)
            .map(|merge| (SpecGridCoord::new(merge.row_start, merge.col), merge))
            .collect();
        let dict_width_by_col = plan_column_widths(&dict_labels, &self.policy_autofit);

        let fmt_header = derive_rust_xlsx_format(&self.fmt_header);
        let fmt_body = derive_rust_xlsx_format(&self.fmt_body);
        let fmt_merged = derive_rust_xlsx_format(&self.fmt_merged);

        let sheet_name_unique =
            self.derive_unique_sheet_name(&sanitize_sheet_name(sheet_name, "_"));
        let worksheet = self.workbook.add_worksheet();
        worksheet.set_name(&sheet_name_unique)?;

        for (coord, label) in &dict_labels {
            let n_row = cast_row_num(coord.row)?;
            let n_col = cast_col_num(coord.col)?;

            if coord.row == 1 {
                if set_header_span_cols.contains(&coord.col) {
                    worksheet.merge_range(
                        n_row,
                        n_col,
                        n_row,
                        cast_col_num(coord.col + 1)?,
                        label,
                        &fmt_header,
                    )?;
                } else {
                    worksheet.write_string_with_format(n_row, n_col, label, &fmt_header)?;
                }
                continue;
            }

            if let Some(merge) = dict_vertical_merges.get(coord) {
                worksheet.merge_range(
                    n_row,
                    n_col,
                    cast_row_num(merge.row_end())?,
                    n_col,
                    label,
                    &fmt_merged,
                )?;
            } else if !label.is_empty() {
                worksheet.write_string_with_format(n_row, n_col, label, &fmt_body)?;
            }
        }

        for (col, n_width) in &dict_width_by_col {
            worksheet.set_column_width(cast_col_num(*col)?, *n_width as f64)?;
        }

        debug!(
            "matrix writer: sheet {sheet_name_unique:?} with {} cells, {} header spans, {} vertical merges",
            dict_labels.len(),
            set_header_span_cols.len(),
            dict_vertical_merges.len()
        );
        self.l_sheet_names.push(sheet_name_unique.clone());
        Ok(sheet_name_unique)
    }

    /// Serialize the workbook to XLSX bytes.
    pub fn save_to_buffer(&mut self) -> Result<Vec<u8>, MatrixTemplateError> {
        Ok(self.workbook.save_to_buffer()?)
    }

    /// Hand over the underlying workbook (e.g. to save it to disk).
    pub fn into_workbook(self) -> Workbook {
        self.workbook
    }

    fn derive_unique_sheet_name(&mut self, name: &str) -> String {
        if !self.set_sheet_names_existing.contains(name) {
            self.set_sheet_names_existing.insert(name.to_string());
            return name.to_string();
        }

        let base_name: String = name
            .chars()
            .take(usize::max(1, N_LEN_EXCEL_SHEET_NAME_MAX - 3))
            .collect();

        let mut n_idx = 2usize;
        loop {
            let candidate: String = format!("{base_name}__{n_idx}")
                .chars()
                .take(N_LEN_EXCEL_SHEET_NAME_MAX)
                .collect();
            if !self.set_sheet_names_existing.contains(&candidate) {
                self.set_sheet_names_existing.insert(candidate.clone());
                return candidate;
            }
            n_idx += 1;
        }
    }
}

fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val as f64);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }
    if spec.italic.unwrap_or(false) {
        format = format.set_italic();
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = &spec.font_color {
        format = format.set_font_color(val.as_str());
    }

    if let Some(val) = spec.border {
        format = format.set_border(derive_format_border(val));
    }
    if let Some(val) = spec.top {
        format = format.set_border_top(derive_format_border(val));
    }
    if let Some(val) = spec.bottom {
        format = format.set_border_bottom(derive_format_border(val));
    }

    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "center_across" => Some(FormatAlign::CenterAcross),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::layout::MatrixTemplates;
    use crate::source::StaticMatrixSource;
    use crate::spec::{
        EnumMatrixDomain, EnumTemplateCellKind, SpecMatrixExportOptions, SpecTemplateCell,
    };

    fn create_engine() -> MatrixTemplates {
        let source = StaticMatrixSource::new().with_domain(
            EnumMatrixDomain::Enterprise,
            vec![
                vec![
                    json!({"tactic": "Initial Access"}),
                    json!({"Valid Accounts": "T1078"}),
                    json!({"Phishing": "T1566"}),
                    json!({"subtechs": {
                        "T1078": [
                            {"Default Accounts": "T1078.001"},
                            {"Domain Accounts": "T1078.002"}
                        ],
                        "T1566": [{"Spearphishing Link": "T1566.002"}]
                    }}),
                ],
                vec![
                    json!({"tactic": "Impact"}),
                    json!({"Data Destruction": "T1485"}),
                ],
            ],
        );
        MatrixTemplates::new("enterprise", &source, false).expect("engine")
    }

    fn create_technique_cell(name: &str, id: &str) -> SpecTemplateCell {
        SpecTemplateCell {
            name: name.to_string(),
            id: Some(id.to_string()),
            kind: EnumTemplateCellKind::Technique,
        }
    }

    #[test]
    fn write_expanded_layout_to_xlsx_bytes() {
        let engine = create_engine();
        let options = SpecMatrixExportOptions {
            if_show_id: true,
            subtechs: ["T1078", "T1566"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let layout = engine.export(&options).expect("export");
        // Both expansions share one header span; the single-row one is written as a plain cell.
        assert_eq!(layout.merges.len(), 2);
        assert_eq!(plan_header_spans(&layout.merges).len(), 1);

        let mut writer = MatrixXlsxWriter::default();
        let sheet_name = writer.write_sheet(&layout, "enterprise").expect("write");
        assert_eq!(sheet_name, "enterprise");

        let v_bytes = writer.save_to_buffer().expect("save");
        assert!(v_bytes.starts_with(b"PK"));
    }

    #[test]
    fn sheet_names_are_sanitized_and_unique() {
        let engine = create_engine();
        let layout = engine
            .export(&SpecMatrixExportOptions::default())
            .expect("export");

        let mut writer = MatrixXlsxWriter::default();
        assert_eq!(writer.write_sheet(&layout, "a/b").expect("first"), "a_b");
        assert_eq!(writer.write_sheet(&layout, "a/b").expect("second"), "a_b__2");
        assert_eq!(writer.sheet_names(), &["a_b".to_string(), "a_b__2".to_string()]);
        assert!(!writer.save_to_buffer().expect("save").is_empty());
    }

    #[test]
    fn empty_layout_writes_an_empty_sheet() {
        let mut writer = MatrixXlsxWriter::default();
        writer
            .write_sheet(&SpecMatrixLayout::default(), "empty")
            .expect("write");
        assert_eq!(writer.into_workbook().worksheets().len(), 1);
    }

    #[test]
    fn overlapping_merges_surface_as_xlsx_errors() {
        let mut layout = SpecMatrixLayout::default();
        layout
            .template
            .insert(SpecGridCoord::new(2, 1), create_technique_cell("A", "T1"));
        layout
            .template
            .insert(SpecGridCoord::new(3, 1), create_technique_cell("B", "T2"));
        layout.merges = vec![
            SpecMergeInstruction {
                row_start: 2,
                col: 1,
                span: 3,
            },
            SpecMergeInstruction {
                row_start: 3,
                col: 1,
                span: 2,
            },
        ];

        let mut writer = MatrixXlsxWriter::default();
        assert!(matches!(
            writer.write_sheet(&layout, "bad"),
            Err(MatrixTemplateError::XlsxWrite(_))
        ));
    }

    #[test]
    fn invalid_autofit_policy_is_rejected() {
        let mut writer = MatrixXlsxWriter::new(
            SpecCellFormat::default(),
            SpecCellFormat::default(),
            SpecCellFormat::default(),
            SpecAutofitCellsPolicy {
                width_cell_min: 10,
                width_cell_max: 5,
                ..Default::default()
            },
        );
        assert!(writer
            .write_sheet(&SpecMatrixLayout::default(), "x")
            .is_err());
    }

    #[test]
    fn format_helpers_map_known_names() {
        assert_eq!(derive_format_align(" Top "), Some(FormatAlign::Top));
        assert_eq!(derive_format_align("sideways"), None);
        assert_eq!(derive_format_border(1), FormatBorder::Thin);
        assert_eq!(derive_format_border(99), FormatBorder::None);
    }
}
