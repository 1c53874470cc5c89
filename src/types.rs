//! Core data model types.
//!
//! A downloaded workbook is described by an [`ArtifactDescriptor`]; each of its tabs becomes a
//! [`SheetFrame`] whose cells are plain text, and each non-empty frame is persisted into the
//! table described by its [`TableSchema`].

use std::path::{Path, PathBuf};

use crate::ingestion::sanitize::table_name;

/// The file produced by one download.
///
/// `discovered_path` is set only once the readiness monitor confirmed the download completed;
/// `renamed_path` only after the timestamped rename succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Directory the browser downloads into.
    pub directory: PathBuf,
    /// Extensions that mark a completed download (without the leading dot).
    pub extensions: Vec<String>,
    /// Path of the completed download as the browser named it.
    pub discovered_path: Option<PathBuf>,
    /// Final `<prefix>_<DD-MM-YYYY_HH-MM-SS>.<ext>` path.
    pub renamed_path: Option<PathBuf>,
}

impl ArtifactDescriptor {
    pub fn new(directory: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            directory: directory.into(),
            extensions,
            discovered_path: None,
            renamed_path: None,
        }
    }

    /// The path the loader should read: the renamed file if the rename happened, otherwise the
    /// discovered one.
    pub fn path(&self) -> Option<&Path> {
        self.renamed_path
            .as_deref()
            .or(self.discovered_path.as_deref())
    }
}

/// One spreadsheet tab, with every cell already coerced to cleaned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetFrame {
    /// Sheet name as it appears in the workbook.
    pub name: String,
    /// Sanitized header row, unique per sheet.
    pub columns: Vec<String>,
    /// Row-major cell storage; every row has `columns.len()` cells.
    pub rows: Vec<Vec<String>>,
}

impl SheetFrame {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// A sheet with no data rows is skipped by the loader.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    /// Derive the table definition for this sheet.
    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(table_name(&self.name), self.columns.clone())
    }
}

/// Table definition derived from a sheet: one text column per source column plus an implicit
/// auto-increment integer key named [`TableSchema::KEY_COLUMN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    /// Name of the surrogate primary key.
    pub const KEY_COLUMN: &'static str = "id";

    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this schema.
    ///
    /// Re-running it against an existing table is a no-op; the existing shape is not checked.
    pub fn create_statement(&self) -> String {
        let mut defs = Vec::with_capacity(self.columns.len() + 1);
        defs.push(format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_ident(Self::KEY_COLUMN)
        ));
        for c in &self.columns {
            defs.push(format!("{} TEXT COLLATE NOCASE", quote_ident(c)));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table),
            defs.join(", ")
        )
    }

    /// Parameterized `INSERT` statement covering every source column.
    pub fn insert_statement(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table),
            cols.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
