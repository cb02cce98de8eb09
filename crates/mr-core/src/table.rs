use std::sync::Arc;

use crate::error::MacroError;
use crate::types::Culture;
use crate::value::MacroValue;

/// Name comparison used by every tabular shape.
///
/// Locales whose native case folding is not ASCII-compatible compare under the
/// invariant culture, so `ID` still matches `id` on a Turkish table.
pub fn tabular_names_match(left: &str, right: &str, locale: &Culture) -> bool {
    let collation = if locale.is_case_insensitive_native() {
        Culture::invariant()
    } else {
        locale.clone()
    };
    collation.fold_case(left) == collation.fold_case(right)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<MacroValue>>,
    locale: Culture,
}

impl DataTable {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|column| column.to_string()).collect(),
            rows: Vec::new(),
            locale: Culture::invariant(),
        }
    }

    pub fn with_locale(mut self, locale: Culture) -> Self {
        self.locale = locale;
        self
    }

    pub fn add_row(&mut self, values: Vec<MacroValue>) -> Result<(), MacroError> {
        if values.len() != self.columns.len() {
            return Err(MacroError::evaluation(format!(
                "Table \"{}\" expects {} values per row, got {}.",
                self.name,
                self.columns.len(),
                values.len()
            )));
        }
        self.rows.push(values);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn locale(&self) -> &Culture {
        &self.locale
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| tabular_names_match(column, name, &self.locale))
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&MacroValue> {
        self.rows.get(row).and_then(|values| values.get(column))
    }

    pub fn row(self: &Arc<Self>, index: usize) -> Option<DataRow> {
        (index < self.rows.len()).then(|| DataRow {
            table: Arc::clone(self),
            index,
        })
    }

    pub fn rows(self: &Arc<Self>) -> Vec<DataRow> {
        (0..self.rows.len())
            .map(|index| DataRow {
                table: Arc::clone(self),
                index,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DataRow {
    table: Arc<DataTable>,
    index: usize,
}

impl DataRow {
    pub fn table(&self) -> &Arc<DataTable> {
        &self.table
    }

    /// `None` when the column does not exist; a present column may hold `Null`.
    pub fn get(&self, column: &str) -> Option<MacroValue> {
        let column = self.table.column_index(column)?;
        self.table.cell(self.index, column).cloned()
    }

    pub fn get_index(&self, column: usize) -> Option<MacroValue> {
        self.table.cell(self.index, column).cloned()
    }
}

impl PartialEq for DataRow {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.table, &other.table) && self.index == other.index
    }
}

/// A row seen through a column projection; hidden columns do not exist for lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRowView {
    row: DataRow,
    visible_columns: Vec<String>,
}

impl DataRowView {
    pub fn new(row: DataRow, visible_columns: &[&str]) -> Self {
        Self {
            row,
            visible_columns: visible_columns.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn row(&self) -> &DataRow {
        &self.row
    }

    pub fn get(&self, column: &str) -> Option<MacroValue> {
        let locale = self.row.table.locale();
        if !self
            .visible_columns
            .iter()
            .any(|visible| tabular_names_match(visible, column, locale))
        {
            return None;
        }
        self.row.get(column)
    }

    pub fn get_index(&self, index: usize) -> Option<MacroValue> {
        let column = self.visible_columns.get(index)?;
        self.row.get(column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    name: String,
    tables: Vec<Arc<DataTable>>,
    locale: Culture,
}

impl DataSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
            locale: Culture::invariant(),
        }
    }

    pub fn with_locale(mut self, locale: Culture) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_table(mut self, table: DataTable) -> Self {
        self.tables.push(Arc::new(table));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &[Arc<DataTable>] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Arc<DataTable>> {
        self.tables
            .iter()
            .find(|table| tabular_names_match(table.name(), name, &self.locale))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TabularValue {
    Row(DataRow),
    RowView(DataRowView),
    Table(Arc<DataTable>),
    Set(Arc<DataSet>),
}

impl TabularValue {
    pub fn table(table: DataTable) -> Self {
        Self::Table(Arc::new(table))
    }

    pub fn set(set: DataSet) -> Self {
        Self::Set(Arc::new(set))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Row(_) => "datarow",
            Self::RowView(_) => "datarowview",
            Self::Table(_) => "datatable",
            Self::Set(_) => "dataset",
        }
    }

    pub fn display_text(&self) -> String {
        match self {
            Self::Row(row) => row.table().name().to_string(),
            Self::RowView(view) => view.row().table().name().to_string(),
            Self::Table(table) => table.name().to_string(),
            Self::Set(set) => set.name().to_string(),
        }
    }
}
