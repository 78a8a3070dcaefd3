//! Stateless helpers shared by the layout engine and the workbook writer.

use std::collections::{BTreeMap, BTreeSet};

use crate::conf::{
    C_DOMAIN_PREFIX, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    TUP_EXCEL_ILLEGAL,
};
use crate::spec::{
    EnumMatrixDomain, MatrixTemplateError, SpecAutofitCellsPolicy, SpecGridCoord,
    SpecLabelPolicy, SpecMergeInstruction,
};

////////////////////////////////////////////////////////////////////////////////
// #region DomainNormalization

/// Strip the optional `mitre-` prefix and validate against the closed domain set.
pub fn normalize_domain(domain: &str) -> Result<EnumMatrixDomain, MatrixTemplateError> {
    let c_domain = domain.strip_prefix(C_DOMAIN_PREFIX).unwrap_or(domain);
    EnumMatrixDomain::ALL
        .into_iter()
        .find(|candidate| candidate.as_str() == c_domain)
        .ok_or_else(|| MatrixTemplateError::InvalidDomain(domain.to_string()))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Labels

/// Compose the rendered label of a technique/sub-technique cell.
///
/// Both flags -> `"ID: Name"`, name only -> `"Name"`, ID only -> `"ID"`,
/// neither -> `""`. A missing ID degrades to the name-only form.
pub fn format_cell_label(name: &str, id: Option<&str>, policy: &SpecLabelPolicy) -> String {
    match (policy.if_show_name, policy.if_show_id, id) {
        (true, true, Some(c_id)) => format!("{c_id}: {name}"),
        (true, _, _) => name.to_string(),
        (false, true, Some(c_id)) => c_id.to_string(),
        _ => String::new(),
    }
}

/// Convert a raw codex scalar to its identifier text (`str(value)` semantics).
pub fn convert_json_scalar_to_str(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region MergeAndExtent

/// Distinct technique columns whose row-1 header spans `col..=col + 1`.
pub fn plan_header_spans(merges: &[SpecMergeInstruction]) -> BTreeSet<usize> {
    merges.iter().map(|merge| merge.col).collect()
}

/// Fail when a layout of `height` x `width` cells cannot fit one worksheet.
pub fn validate_layout_extent(height: usize, width: usize) -> Result<(), MatrixTemplateError> {
    if height > N_NROWS_EXCEL_MAX {
        return Err(MatrixTemplateError::LayoutOverflow(format!(
            "height={height} exceeds {N_NROWS_EXCEL_MAX} rows."
        )));
    }
    if width > N_NCOLS_EXCEL_MAX {
        return Err(MatrixTemplateError::LayoutOverflow(format!(
            "width={width} exceeds {N_NCOLS_EXCEL_MAX} columns."
        )));
    }
    Ok(())
}

/// Convert a 1-based grid row to a 0-based worksheet row.
pub fn cast_row_num(row: usize) -> Result<u32, MatrixTemplateError> {
    row.checked_sub(1)
        .and_then(|n_row| u32::try_from(n_row).ok())
        .ok_or_else(|| MatrixTemplateError::LayoutOverflow(format!("row index overflow: {row}")))
}

/// Convert a 1-based grid column to a 0-based worksheet column.
pub fn cast_col_num(col: usize) -> Result<u16, MatrixTemplateError> {
    col.checked_sub(1)
        .and_then(|n_col| u16::try_from(n_col).ok())
        .ok_or_else(|| {
            MatrixTemplateError::LayoutOverflow(format!("column index overflow: {col}"))
        })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WidthAndSheetNames

/// Estimate displayed width units of a label (wide glyphs count 1.6).
pub fn estimate_unicode_string_width(s: &str) -> usize {
    let n_ascii = s.chars().filter(|chr| chr.is_ascii()).count();
    let n_non_ascii = s.chars().count().saturating_sub(n_ascii);
    n_ascii + (n_non_ascii as f64 * 1.6).round() as usize
}

/// Plan final widths per 1-based column from rendered labels.
///
/// Empty labels do not contribute; columns with no visible text are omitted.
pub fn plan_column_widths(
    labels: &BTreeMap<SpecGridCoord, String>,
    policy: &SpecAutofitCellsPolicy,
) -> BTreeMap<usize, usize> {
    let mut dict_width_by_col: BTreeMap<usize, usize> = BTreeMap::new();
    if !policy.if_enabled {
        return dict_width_by_col;
    }

    for (coord, label) in labels {
        if label.is_empty() {
            continue;
        }
        let n_width = estimate_unicode_string_width(label);
        let n_width_recorded = dict_width_by_col.entry(coord.col).or_insert(0);
        *n_width_recorded = usize::max(*n_width_recorded, n_width);
    }

    let n_min = usize::max(1, policy.width_cell_min);
    let n_max = usize::min(255, usize::max(n_min, policy.width_cell_max));
    for n_width in dict_width_by_col.values_mut() {
        *n_width = usize::min(n_max, usize::max(n_min, *n_width + policy.width_cell_padding));
    }
    dict_width_by_col
}

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::conf::TUP_DOMAINS;

    #[test_case("enterprise", Some(EnumMatrixDomain::Enterprise) ; "bare enterprise")]
    #[test_case("mitre-enterprise", Some(EnumMatrixDomain::Enterprise) ; "prefixed enterprise")]
    #[test_case("mobile", Some(EnumMatrixDomain::Mobile) ; "bare mobile")]
    #[test_case("mitre-mobile", Some(EnumMatrixDomain::Mobile) ; "prefixed mobile")]
    #[test_case("ics", None ; "unknown domain")]
    #[test_case("mitre-", None ; "prefix only")]
    #[test_case("Enterprise", None ; "case sensitive")]
    fn test_normalize_domain(domain: &str, expected: Option<EnumMatrixDomain>) {
        match (normalize_domain(domain), expected) {
            (Ok(got), Some(want)) => assert_eq!(got, want),
            (Err(MatrixTemplateError::InvalidDomain(c_raw)), None) => assert_eq!(c_raw, domain),
            (got, want) => panic!("unexpected {got:?} for {domain:?}, wanted {want:?}"),
        }
    }

    #[test]
    fn test_normalize_domain_accepts_every_listed_domain() {
        for c_domain in TUP_DOMAINS {
            let domain = normalize_domain(c_domain).expect("listed domain");
            assert_eq!(domain.as_str(), c_domain);
            let c_prefixed = format!("{C_DOMAIN_PREFIX}{c_domain}");
            assert_eq!(normalize_domain(&c_prefixed).ok(), Some(domain));
        }
    }

    #[test_case(true, true, "T1059: Command and Scripting Interpreter")]
    #[test_case(true, false, "Command and Scripting Interpreter")]
    #[test_case(false, true, "T1059")]
    #[test_case(false, false, "")]
    fn test_format_cell_label(if_show_name: bool, if_show_id: bool, expected: &str) {
        let policy = SpecLabelPolicy {
            if_show_name,
            if_show_id,
        };
        assert_eq!(
            format_cell_label("Command and Scripting Interpreter", Some("T1059"), &policy),
            expected
        );
    }

    #[test]
    fn test_json_scalar_conversion() {
        assert_eq!(
            convert_json_scalar_to_str(&serde_json::json!("T1001")).as_deref(),
            Some("T1001")
        );
        assert_eq!(
            convert_json_scalar_to_str(&serde_json::json!(42)).as_deref(),
            Some("42")
        );
        assert_eq!(convert_json_scalar_to_str(&serde_json::json!([1])), None);
    }

    #[test]
    fn test_header_spans_are_deduplicated() {
        let merges = [
            SpecMergeInstruction {
                row_start: 2,
                col: 3,
                span: 2,
            },
            SpecMergeInstruction {
                row_start: 5,
                col: 3,
                span: 4,
            },
            SpecMergeInstruction {
                row_start: 2,
                col: 6,
                span: 1,
            },
        ];
        assert_eq!(
            plan_header_spans(&merges).into_iter().collect::<Vec<_>>(),
            vec![3, 6]
        );
    }

    #[test]
    fn test_cast_is_one_based() {
        assert_eq!(cast_row_num(1).ok(), Some(0));
        assert_eq!(cast_col_num(3).ok(), Some(2));
        assert!(cast_row_num(0).is_err());
        assert!(cast_col_num(70_000).is_err());
    }

    #[test]
    fn test_validate_layout_extent() {
        assert!(validate_layout_extent(10, 20).is_ok());
        assert!(validate_layout_extent(N_NROWS_EXCEL_MAX + 1, 1).is_err());
        assert!(validate_layout_extent(1, N_NCOLS_EXCEL_MAX + 1).is_err());
    }

    #[test]
    fn test_plan_column_widths_uses_longest_label() {
        let mut labels = BTreeMap::new();
        labels.insert(SpecGridCoord::new(1, 1), "Impact".to_string());
        labels.insert(SpecGridCoord::new(2, 1), "Data Destruction".to_string());
        labels.insert(SpecGridCoord::new(2, 2), String::new());

        let dict_widths = plan_column_widths(&labels, &SpecAutofitCellsPolicy::default());
        assert_eq!(dict_widths.get(&1), Some(&16));
        assert_eq!(dict_widths.get(&2), None);

        let policy = SpecAutofitCellsPolicy {
            if_enabled: false,
            ..Default::default()
        };
        assert!(plan_column_widths(&labels, &policy).is_empty());
    }

    #[test]
    fn test_sanitize_sheet_name() {
        assert_eq!(sanitize_sheet_name("a/b:c", "_"), "a_b_c");
        assert_eq!(sanitize_sheet_name("   ", "_"), "Sheet");
        assert_eq!(sanitize_sheet_name(&"x".repeat(40), "_").len(), 31);
    }
}
