//! Schema-inferring loader: one workbook in, one table per non-empty sheet out.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{PipelineError, PipelineResult};
use crate::status::{Stage, StatusEvent, StatusSink};
use crate::store::{RelationalStore, StoreConnection};
use crate::types::{SheetFrame, TableSchema};

use super::excel::Workbook;

/// Rows loaded into one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoad {
    pub sheet: String,
    pub table: String,
    pub rows: usize,
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Loaded tables, in sheet order.
    pub tables: Vec<TableLoad>,
    /// Sheets skipped because they had no data rows.
    pub skipped_sheets: Vec<String>,
}

impl LoadReport {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Loads every sheet of a workbook into its own all-text table.
///
/// Per sheet, in workbook order:
///
/// 1. check for cancellation
/// 2. read and clean the sheet; skip it if it has no data rows
/// 3. `CREATE TABLE IF NOT EXISTS` on a dedicated connection
/// 4. insert row by row (checking for cancellation before each row), then commit
///
/// The first failure aborts the whole load. Sheets committed before it stay committed; the
/// failing sheet's rows are rolled back.
pub struct SchemaInferringLoader<'a> {
    store: &'a dyn RelationalStore,
    sink: &'a dyn StatusSink,
}

impl<'a> SchemaInferringLoader<'a> {
    pub fn new(store: &'a dyn RelationalStore, sink: &'a dyn StatusSink) -> Self {
        Self { store, sink }
    }

    /// Load the workbook at `path`.
    pub fn load(&self, path: &Path, token: &CancellationToken) -> PipelineResult<LoadReport> {
        if token.is_cancelled() {
            warn!("cancellation requested before loading started");
            return Err(PipelineError::Cancelled);
        }

        info!(path = %path.display(), store = %self.store.describe(), "loading workbook");
        let mut workbook = Workbook::open(path).inspect_err(|e| {
            error!(path = %path.display(), error = %e, "failed to open workbook");
        })?;
        let sheet_names = workbook.sheet_names();
        self.emit(StatusEvent::info(
            Stage::Load,
            format!("Sheets found in {}: {:?}", path.display(), sheet_names),
        ));

        let mut conn = self.store.connect().map_err(|e| {
            error!(store = %self.store.describe(), error = %e, "failed to connect for row insertion");
            PipelineError::Connection(e)
        })?;

        let mut report = LoadReport::default();
        for name in sheet_names {
            if token.is_cancelled() {
                warn!(sheet = %name, "cancellation requested while reading sheets");
                return Err(PipelineError::Cancelled);
            }

            self.emit(StatusEvent::info(Stage::Load, format!("Processing sheet: {name}")));
            let frame = workbook.read_sheet(&name).inspect_err(|e| {
                error!(sheet = %name, error = %e, "failed to read sheet");
            })?;
            info!(sheet = %name, rows = frame.row_count(), columns = frame.columns.len(), "sheet read");

            if frame.is_empty() {
                self.emit(StatusEvent::warning(
                    Stage::Load,
                    format!("Sheet {name} is empty, skipping"),
                ));
                report.skipped_sheets.push(name);
                continue;
            }

            let schema = frame.table_schema();
            self.provision_table(&schema)?;
            let rows = self.insert_rows(conn.as_mut(), &frame, &schema, token)?;
            conn.commit().inspect_err(|e| {
                error!(table = %schema.table, error = %e, "commit failed");
            })?;

            self.emit(StatusEvent::success(
                Stage::Load,
                format!("{rows} rows inserted into table `{}`", schema.table),
            ));
            report.tables.push(TableLoad {
                sheet: frame.name,
                table: schema.table,
                rows,
            });
        }

        conn.close()?;
        Ok(report)
    }

    /// Create the table if it does not exist yet, on a connection of its own.
    ///
    /// Existing tables are not compared against `schema`.
    pub fn provision_table(&self, schema: &TableSchema) -> PipelineResult<()> {
        let fail = |source| {
            error!(table = %schema.table, error = %source, "failed to create/verify table");
            PipelineError::SchemaProvision {
                table: schema.table.clone(),
                source,
            }
        };

        let mut conn = self.store.connect().map_err(|e| {
            error!(table = %schema.table, error = %e, "failed to connect for table provisioning");
            PipelineError::Connection(e)
        })?;
        let statement = schema.create_statement();
        debug!(table = %schema.table, %statement, "provisioning table");
        conn.execute(&statement, &[]).map_err(fail)?;
        conn.commit().map_err(fail)?;
        conn.close().map_err(fail)?;

        self.emit(StatusEvent::info(
            Stage::Load,
            format!("Table `{}` created/verified", schema.table),
        ));
        Ok(())
    }

    fn insert_rows(
        &self,
        conn: &mut dyn StoreConnection,
        frame: &SheetFrame,
        schema: &TableSchema,
        token: &CancellationToken,
    ) -> PipelineResult<usize> {
        let statement = schema.insert_statement();
        info!(table = %schema.table, rows = frame.row_count(), "inserting rows");

        for (idx, row) in frame.rows.iter().enumerate() {
            // 1-based, like a spreadsheet.
            let row_no = idx + 1;
            if token.is_cancelled() {
                warn!(table = %schema.table, row = row_no, "cancellation requested during insert");
                return Err(PipelineError::Cancelled);
            }

            let params: Vec<&str> = row.iter().map(String::as_str).collect();
            debug!(table = %schema.table, row = row_no, values = ?row, "inserting row");
            conn.execute(&statement, &params).map_err(|source| {
                error!(table = %schema.table, row = row_no, error = %source, "row insert failed");
                error!(table = %schema.table, values = ?row, "offending values");
                PipelineError::RowInsert {
                    table: schema.table.clone(),
                    row: row_no,
                    values: row.clone(),
                    source,
                }
            })?;
        }
        Ok(frame.row_count())
    }

    fn emit(&self, event: StatusEvent) {
        self.sink.emit(&event);
    }
}
