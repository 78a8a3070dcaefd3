//! Matrix constants, static tactic tables and default preset factories.

use std::collections::BTreeMap;

use crate::spec::{
    EnumMatrixDomain, SpecAutofitCellsPolicy, SpecCellFormat, SpecMatrixExportOptions,
};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Source-qualified domain prefix stripped before validation (`mitre-enterprise`).
pub const C_DOMAIN_PREFIX: &str = "mitre-";
/// Accepted matrix domains after prefix stripping.
pub const TUP_DOMAINS: [&str; 2] = [
    EnumMatrixDomain::ALL[0].as_str(),
    EnumMatrixDomain::ALL[1].as_str(),
];

/// Reserved raw-codex key carrying the tactic display name.
pub const C_KEY_TACTIC: &str = "tactic";
/// Reserved raw-codex key carrying sub-technique groups.
pub const C_KEY_SUBTECHS: &str = "subtechs";

/// Tactic display name -> tactic identifier.
pub const TUP_TACTIC_IDS: [(&str, &str); 12] = [
    ("Initial Access", "TA0001"),
    ("Execution", "TA0002"),
    ("Persistence", "TA0003"),
    ("Privilege Escalation", "TA0004"),
    ("Defense Evasion", "TA0005"),
    ("Credential Access", "TA0006"),
    ("Discovery", "TA0007"),
    ("Lateral Movement", "TA0008"),
    ("Collection", "TA0009"),
    ("Command and Control", "TA0011"),
    ("Exfiltration", "TA0010"),
    ("Impact", "TA0040"),
];

/// Tactic short-form (layer `tactic` field) -> column header label.
pub const TUP_TACTIC_SHORT_FORMS: [(&str, &str); 14] = [
    ("initial-access", "Initial Access"),
    ("execution", "Execution"),
    ("persistence", "Persistence"),
    ("privilege-escalation", "Privilege Escalation"),
    ("defense-evasion", "Defense Evasion"),
    ("credential-access", "Credential Access"),
    ("discovery", "Discovery"),
    ("lateral-movement", "Lateral Movement"),
    ("collection", "Collection"),
    ("command-and-control", "Command and Control"),
    ("exfiltration", "Exfiltration"),
    ("impact", "Impact"),
    ("network-effects", "Network Effects"),
    ("remote-service-effects", "Remote Service Effects"),
];

/// Look up the static identifier of a tactic display name.
pub fn derive_tactic_id(tactic_name: &str) -> Option<&'static str> {
    TUP_TACTIC_IDS
        .iter()
        .find(|(c_name, _)| *c_name == tactic_name)
        .map(|(_, c_id)| *c_id)
}

/// Resolve a tactic filter to the header label it must match.
///
/// Short forms (`"defense-evasion"`) map through the short-form table; a value
/// that already is one of the table's header labels is accepted as-is.
pub fn derive_tactic_header_label(tactic: &str) -> Option<&'static str> {
    TUP_TACTIC_SHORT_FORMS
        .iter()
        .find(|(c_short, c_label)| *c_short == tactic || *c_label == tactic)
        .map(|(_, c_label)| *c_label)
}

/// Build default named format presets used by [`crate::writer::MatrixXlsxWriter`].
///
/// Keys: `header` (row 1), `body` (technique/sub-technique cells) and
/// `merged` (vertically merged technique cells).
pub fn derive_default_matrix_formats() -> BTreeMap<String, SpecCellFormat> {
    let cfg_base_fmt_spec = SpecCellFormat {
        font_name: Some("Calibri".to_string()),
        font_size: Some(11),
        ..Default::default()
    };

    let mut dict_fmt = BTreeMap::new();
    dict_fmt.insert("body".to_string(), cfg_base_fmt_spec.clone());
    dict_fmt.insert(
        "merged".to_string(),
        cfg_base_fmt_spec.with_(SpecCellFormat {
            valign: Some("top".to_string()),
            ..Default::default()
        }),
    );
    dict_fmt.insert(
        "header".to_string(),
        cfg_base_fmt_spec.with_(SpecCellFormat {
            bold: Some(true),
            align: Some("center".to_string()),
            valign: Some("bottom".to_string()),
            bottom: Some(1),
            bg_color: Some("#DDDDDD".to_string()),
            ..Default::default()
        }),
    );

    dict_fmt
}

/// Build default export options (names shown, IDs hidden, nothing expanded).
pub fn derive_default_export_options() -> SpecMatrixExportOptions {
    SpecMatrixExportOptions::default()
}

/// Build default autofit policy (exact longest-label width).
pub fn derive_default_autofit_policy() -> SpecAutofitCellsPolicy {
    SpecAutofitCellsPolicy::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tactic_id_table_covers_twelve_tactics() {
        assert_eq!(TUP_TACTIC_IDS.len(), 12);
        assert_eq!(derive_tactic_id("Command and Control"), Some("TA0011"));
        assert_eq!(derive_tactic_id("Exfiltration"), Some("TA0010"));
        assert_eq!(derive_tactic_id("Impact"), Some("TA0040"));
        assert_eq!(derive_tactic_id("Reconnaissance"), None);
    }

    #[test]
    fn domain_names_follow_domain_enum() {
        assert_eq!(TUP_DOMAINS, ["enterprise", "mobile"]);
        for (c_domain, domain) in TUP_DOMAINS.iter().zip(EnumMatrixDomain::ALL) {
            assert_eq!(*c_domain, domain.as_str());
        }
    }

    #[test]
    fn tactic_header_label_accepts_short_and_display_forms() {
        assert_eq!(derive_tactic_header_label("defense-evasion"), Some("Defense Evasion"));
        assert_eq!(derive_tactic_header_label("Impact"), Some("Impact"));
        assert_eq!(derive_tactic_header_label("not-a-tactic"), None);
    }

    #[test]
    fn default_header_format_is_bold_and_filled() {
        let dict_fmt = derive_default_matrix_formats();
        let fmt_header = &dict_fmt["header"];
        assert_eq!(fmt_header.bold, Some(true));
        assert_eq!(fmt_header.bg_color.as_deref(), Some("#DDDDDD"));
        assert_eq!(fmt_header.font_name.as_deref(), Some("Calibri"));
        assert_eq!(dict_fmt["merged"].valign.as_deref(), Some("top"));
        assert_eq!(dict_fmt["body"].bold, None);
    }
}
