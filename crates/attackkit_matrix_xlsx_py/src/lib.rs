use std::sync::Arc;

use attackkit_matrix_xlsx::conf::{TUP_DOMAINS, derive_default_export_options};
use attackkit_matrix_xlsx::{
    JsonMatrixSource, MatrixTemplateError, MatrixTemplates, MatrixXlsxWriter,
    SpecMatrixExportOptions, SpecMatrixLayout, derive_shared_json_source,
};
use pyo3::exceptions::{PyOSError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict};

const N_BRIDGE_ABI_VERSION: u64 = 1;
const C_BRIDGE_CONTRACT_VERSION: &str = "attackkit.matrix.templates.v1";
const C_BRIDGE_TRANSPORT: &str = "python_objects";

#[pyclass(name = "MatrixLayout", frozen)]
struct PyMatrixLayout {
    inner: SpecMatrixLayout,
}

#[pymethods]
impl PyMatrixLayout {
    /// `{(row, col): name}` for every populated cell.
    fn template<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict_template = PyDict::new(py);
        for (coord, cell) in &self.inner.template {
            dict_template.set_item((coord.row, coord.col), cell.name.as_str())?;
        }
        Ok(dict_template)
    }

    /// `{(row, col): label}` rendered with the layout's label policy.
    fn labels<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict_labels = PyDict::new(py);
        for (coord, label) in self.inner.labels() {
            dict_labels.set_item((coord.row, coord.col), label)?;
        }
        Ok(dict_labels)
    }

    fn merges(&self) -> Vec<(usize, usize, usize)> {
        self.inner
            .merges
            .iter()
            .map(|merge| (merge.row_start, merge.col, merge.span))
            .collect()
    }

    #[getter]
    fn warnings(&self) -> Vec<String> {
        self.inner.warnings.clone()
    }

    #[getter]
    fn height(&self) -> usize {
        self.inner.height()
    }

    #[getter]
    fn width(&self) -> usize {
        self.inner.width()
    }

    fn __repr__(&self) -> String {
        format!(
            "MatrixLayout(height={}, width={}, cells={}, merges={})",
            self.inner.height(),
            self.inner.width(),
            self.inner.template.len(),
            self.inner.merges.len()
        )
    }
}

#[pyclass(name = "ExcelTemplates", frozen)]
struct PyExcelTemplates {
    source: Arc<JsonMatrixSource>,
    inner: MatrixTemplates,
}

#[pymethods]
impl PyExcelTemplates {
    #[new]
    #[pyo3(signature = (domain, source_dir, fresh = false))]
    fn new(py: Python<'_>, domain: String, source_dir: String, fresh: bool) -> PyResult<Self> {
        let source = derive_shared_json_source(source_dir);
        let inner = py
            .allow_threads(|| MatrixTemplates::new(&domain, &*source, fresh))
            .map_err(map_matrix_template_error)?;
        Ok(Self { source, inner })
    }

    #[getter]
    fn source_dir(&self) -> String {
        self.source.dir_root().display().to_string()
    }

    #[getter]
    fn domain(&self) -> &'static str {
        self.inner.domain().as_str()
    }

    #[pyo3(signature = (show_name = true, show_id = false, subtechs = None, exclude = None))]
    fn export(
        &self,
        show_name: bool,
        show_id: bool,
        subtechs: Option<Vec<String>>,
        exclude: Option<Vec<String>>,
    ) -> PyResult<PyMatrixLayout> {
        let cfg_options = create_export_options(show_name, show_id, subtechs, exclude);
        let layout = self
            .inner
            .export(&cfg_options)
            .map_err(map_matrix_template_error)?;
        Ok(PyMatrixLayout { inner: layout })
    }

    #[pyo3(signature = (
        show_name = true,
        show_id = false,
        subtechs = None,
        exclude = None,
        sheet_name = "matrix"
    ))]
    fn export_xlsx<'py>(
        &self,
        py: Python<'py>,
        show_name: bool,
        show_id: bool,
        subtechs: Option<Vec<String>>,
        exclude: Option<Vec<String>>,
        sheet_name: &str,
    ) -> PyResult<Bound<'py, PyBytes>> {
        let cfg_options = create_export_options(show_name, show_id, subtechs, exclude);
        let v_bytes = py
            .allow_threads(|| -> Result<Vec<u8>, MatrixTemplateError> {
                let layout = self.inner.export(&cfg_options)?;
                let mut writer = MatrixXlsxWriter::default();
                writer.write_sheet(&layout, sheet_name)?;
                writer.save_to_buffer()
            })
            .map_err(map_matrix_template_error)?;
        Ok(PyBytes::new(py, &v_bytes))
    }

    fn get_id(&self, name: &str) -> Option<String> {
        self.inner.lookup_id(name)
    }

    #[pyo3(signature = (layout, technique_id, tactic = None))]
    fn retrieve_coords(
        &self,
        layout: PyRef<'_, PyMatrixLayout>,
        technique_id: &str,
        tactic: Option<&str>,
    ) -> Vec<(usize, usize)> {
        self.inner
            .lookup_coordinates(&layout.inner, technique_id, tactic)
            .into_iter()
            .map(|coord| (coord.row, coord.col))
            .collect()
    }
}

fn create_export_options(
    show_name: bool,
    show_id: bool,
    subtechs: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
) -> SpecMatrixExportOptions {
    let mut cfg_options = derive_default_export_options();
    cfg_options.if_show_name = show_name;
    cfg_options.if_show_id = show_id;
    cfg_options.subtechs = subtechs.unwrap_or_default().into_iter().collect();
    cfg_options.exclude = exclude.unwrap_or_default().into_iter().collect();
    cfg_options
}

fn map_matrix_template_error(exception: MatrixTemplateError) -> PyErr {
    match exception {
        MatrixTemplateError::InvalidDomain(_)
        | MatrixTemplateError::Structural(_)
        | MatrixTemplateError::LayoutOverflow(_) => PyValueError::new_err(exception.to_string()),
        MatrixTemplateError::Io(_) => PyOSError::new_err(exception.to_string()),
        _ => PyRuntimeError::new_err(exception.to_string()),
    }
}

#[pymodule]
fn _attackkit_matrix_xlsx_rs(module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyExcelTemplates>()?;
    module.add_class::<PyMatrixLayout>()?;
    module.add("DOMAINS", TUP_DOMAINS.to_vec())?;
    module.add("__bridge_abi__", N_BRIDGE_ABI_VERSION)?;
    module.add("__bridge_contract__", C_BRIDGE_CONTRACT_VERSION)?;
    module.add("__bridge_transport__", C_BRIDGE_TRANSPORT)?;
    Ok(())
}
