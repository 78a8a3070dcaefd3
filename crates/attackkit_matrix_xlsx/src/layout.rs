//! Matrix layout engine: domain loading, template construction and lookups.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use log::{debug, warn};

use crate::conf::{derive_tactic_header_label, derive_tactic_id};
use crate::source::{MatrixSource, parse_matrix_columns};
use crate::spec::{
    EnumMatrixDomain, EnumMatrixNode, EnumTemplateCellKind, MatrixTemplateError,
    SpecGridCoord, SpecMatrixColumn, SpecMatrixExportOptions, SpecMatrixLayout,
    SpecMergeInstruction, SpecSubtechniqueEntry, SpecTemplateCell,
};
use crate::util::{normalize_domain, validate_layout_extent};

////////////////////////////////////////////////////////////////////////////////
// #region MatrixTraversal

/// Visit every node depth-first: each tactic, then each of its techniques
/// followed by that technique's sub-techniques. Stops at the first `Break`.
pub fn walk_matrix<'a, B>(
    columns: &'a [SpecMatrixColumn],
    visit: &mut impl FnMut(EnumMatrixNode<'a>) -> ControlFlow<B>,
) -> ControlFlow<B> {
    for column in columns {
        walk_node(EnumMatrixNode::Tactic(column), visit)?;
    }
    ControlFlow::Continue(())
}

fn walk_node<'a, B>(
    node: EnumMatrixNode<'a>,
    visit: &mut impl FnMut(EnumMatrixNode<'a>) -> ControlFlow<B>,
) -> ControlFlow<B> {
    visit(node)?;
    match node {
        EnumMatrixNode::Tactic(column) => {
            for technique in &column.techniques {
                walk_node(EnumMatrixNode::Technique(technique), visit)?;
            }
        }
        EnumMatrixNode::Technique(technique) => {
            for subtechnique in &technique.subtechniques {
                walk_node(EnumMatrixNode::Subtechnique(subtechnique), visit)?;
            }
        }
        EnumMatrixNode::Subtechnique(_) => {}
    }
    ControlFlow::Continue(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Engine

/// Layout engine bound to one loaded matrix domain.
///
/// The loaded matrix is immutable; every [`Self::export`] builds a fresh
/// [`SpecMatrixLayout`] that callers thread into [`Self::lookup_coordinates`].
#[derive(Debug, Clone)]
pub struct MatrixTemplates {
    domain: EnumMatrixDomain,
    l_columns: Vec<SpecMatrixColumn>,
}

impl MatrixTemplates {
    /// Validate `domain` (optionally `mitre-` prefixed), then load and validate
    /// its matrix from `source`.
    ///
    /// The domain is checked before the source is touched.
    pub fn new(
        domain: &str,
        source: &dyn MatrixSource,
        if_fresh: bool,
    ) -> Result<Self, MatrixTemplateError> {
        let domain = normalize_domain(domain)?;
        let l_raw_columns = source.load_matrix(domain, if_fresh)?;
        let l_columns = parse_matrix_columns(&l_raw_columns)?;
        debug!(
            "matrix templates: loaded {domain} with {} tactics, {} techniques",
            l_columns.len(),
            l_columns.iter().map(|c| c.techniques.len()).sum::<usize>()
        );
        Ok(Self::from_columns(domain, l_columns))
    }

    /// Wrap already-validated columns.
    pub fn from_columns(domain: EnumMatrixDomain, columns: Vec<SpecMatrixColumn>) -> Self {
        Self {
            domain,
            l_columns: columns,
        }
    }

    pub fn domain(&self) -> EnumMatrixDomain {
        self.domain
    }

    /// Loaded tactic columns, left to right.
    pub fn columns(&self) -> &[SpecMatrixColumn] {
        &self.l_columns
    }

    /// Build the template and merge list for one set of filters.
    ///
    /// Each tactic gets one column, plus an adjacent sub-technique column when
    /// at least one of its techniques is expanded. Excluded techniques and
    /// sub-techniques leave no gap behind.
    pub fn export(
        &self,
        options: &SpecMatrixExportOptions,
    ) -> Result<SpecMatrixLayout, MatrixTemplateError> {
        let mut layout = SpecMatrixLayout {
            label_policy: options.label_policy(),
            ..Default::default()
        };
        self.warn_unknown_filter_ids(options, &mut layout);

        let mut n_col = 1usize;
        for column in &self.l_columns {
            layout.template.insert(
                SpecGridCoord::new(1, n_col),
                SpecTemplateCell {
                    name: column.tactic.clone(),
                    id: None,
                    kind: EnumTemplateCellKind::Tactic,
                },
            );

            let mut n_row = 2usize;
            let mut if_has_subtechnique_col = false;
            for technique in &column.techniques {
                if options.exclude.contains(&technique.id) {
                    continue;
                }
                layout.template.insert(
                    SpecGridCoord::new(n_row, n_col),
                    SpecTemplateCell {
                        name: technique.name.clone(),
                        id: Some(technique.id.clone()),
                        kind: EnumTemplateCellKind::Technique,
                    },
                );

                let l_subtechniques_visible: Vec<&SpecSubtechniqueEntry> =
                    if options.subtechs.contains(&technique.id) {
                        technique
                            .subtechniques
                            .iter()
                            .filter(|s| !options.exclude.contains(&s.id))
                            .collect()
                    } else {
                        Vec::new()
                    };
                if l_subtechniques_visible.is_empty() {
                    n_row += 1;
                    continue;
                }

                for (n_offset, subtechnique) in l_subtechniques_visible.iter().enumerate() {
                    layout.template.insert(
                        SpecGridCoord::new(n_row + n_offset, n_col + 1),
                        SpecTemplateCell {
                            name: subtechnique.name.clone(),
                            id: Some(subtechnique.id.clone()),
                            kind: EnumTemplateCellKind::Subtechnique,
                        },
                    );
                }
                layout.merges.push(SpecMergeInstruction {
                    row_start: n_row,
                    col: n_col,
                    span: l_subtechniques_visible.len(),
                });
                n_row += l_subtechniques_visible.len();
                if_has_subtechnique_col = true;
            }

            n_col += if if_has_subtechnique_col { 2 } else { 1 };
        }

        validate_layout_extent(layout.height(), layout.width())?;
        debug!(
            "matrix templates: built {} layout {}x{} with {} cells, {} merges",
            self.domain,
            layout.height(),
            layout.width(),
            layout.template.len(),
            layout.merges.len()
        );
        Ok(layout)
    }

    /// Identifier of a tactic, technique or sub-technique display name.
    ///
    /// Scans the loaded matrix (not a filtered layout) and returns the first
    /// match; tactics resolve through the static tactic-ID table.
    pub fn lookup_id(&self, name: &str) -> Option<String> {
        walk_matrix(&self.l_columns, &mut |node| match node {
            EnumMatrixNode::Tactic(column) if column.tactic == name => {
                match derive_tactic_id(&column.tactic) {
                    Some(c_id) => ControlFlow::Break(c_id.to_string()),
                    None => ControlFlow::Continue(()),
                }
            }
            EnumMatrixNode::Technique(technique) if technique.name == name => {
                ControlFlow::Break(technique.id.clone())
            }
            EnumMatrixNode::Subtechnique(subtechnique) if subtechnique.name == name => {
                ControlFlow::Break(subtechnique.id.clone())
            }
            _ => ControlFlow::Continue(()),
        })
        .break_value()
    }

    /// Display name of a technique or sub-technique identifier (first match).
    pub fn resolve_name(&self, technique_id: &str) -> Option<&str> {
        walk_matrix(&self.l_columns, &mut |node| match node {
            EnumMatrixNode::Technique(technique) if technique.id == technique_id => {
                ControlFlow::Break(technique.name.as_str())
            }
            EnumMatrixNode::Subtechnique(subtechnique) if subtechnique.id == technique_id => {
                ControlFlow::Break(subtechnique.name.as_str())
            }
            _ => ControlFlow::Continue(()),
        })
        .break_value()
    }

    /// Every coordinate of `layout` showing the technique/sub-technique `technique_id`.
    ///
    /// With `tactic` (short form like `"defense-evasion"` or a header label),
    /// only coordinates under that tactic's header are kept; sub-technique
    /// columns are judged by the header one column to the left. Unknown IDs
    /// or tactics yield an empty list.
    pub fn lookup_coordinates(
        &self,
        layout: &SpecMatrixLayout,
        technique_id: &str,
        tactic: Option<&str>,
    ) -> Vec<SpecGridCoord> {
        let Some(c_name) = self.resolve_name(technique_id) else {
            return Vec::new();
        };
        let c_header_expected = match tactic {
            None => None,
            Some(c_tactic) => match derive_tactic_header_label(c_tactic) {
                Some(c_label) => Some(c_label),
                None => {
                    warn!("matrix templates: unknown tactic filter {c_tactic:?}");
                    return Vec::new();
                }
            },
        };

        layout
            .template
            .iter()
            .filter(|(_, cell)| cell.kind != EnumTemplateCellKind::Tactic && cell.name == c_name)
            .map(|(coord, _)| *coord)
            .filter(|coord| match c_header_expected {
                None => true,
                Some(c_label) => derive_column_header(layout, coord.col) == Some(c_label),
            })
            .collect()
    }

    fn warn_unknown_filter_ids(
        &self,
        options: &SpecMatrixExportOptions,
        layout: &mut SpecMatrixLayout,
    ) {
        let mut set_technique_ids: BTreeSet<&str> = BTreeSet::new();
        let mut set_all_ids: BTreeSet<&str> = BTreeSet::new();
        let _: ControlFlow<()> = walk_matrix(&self.l_columns, &mut |node| {
            match node {
                EnumMatrixNode::Technique(technique) => {
                    set_technique_ids.insert(&technique.id);
                    set_all_ids.insert(&technique.id);
                }
                EnumMatrixNode::Subtechnique(subtechnique) => {
                    set_all_ids.insert(&subtechnique.id);
                }
                EnumMatrixNode::Tactic(_) => {}
            }
            ControlFlow::Continue(())
        });

        for c_id in &options.subtechs {
            if !set_technique_ids.contains(c_id.as_str()) {
                let c_msg = format!("subtechs: unknown technique ID {c_id:?}");
                warn!("matrix templates: {c_msg}");
                layout.warn(c_msg);
            }
        }
        for c_id in &options.exclude {
            if !set_all_ids.contains(c_id.as_str()) {
                let c_msg = format!("exclude: unknown technique ID {c_id:?}");
                warn!("matrix templates: {c_msg}");
                layout.warn(c_msg);
            }
        }
    }
}

/// Row-1 header owning `col`: its own, or the one to its left for a
/// sub-technique column.
fn derive_column_header(layout: &SpecMatrixLayout, col: usize) -> Option<&str> {
    layout
        .header(col)
        .or_else(|| col.checked_sub(1).and_then(|n_col| layout.header(n_col)))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
