//! Spreadsheet ingestion.
//!
//! Most callers should use [`SchemaInferringLoader`], which reads a downloaded workbook and
//! persists each non-empty sheet into its own table.
//!
//! - [`excel`]: workbook reading, text coercion of cells
//! - [`sanitize`]: cell cleaning and table/column naming rules
//! - [`loader`]: table provisioning and row insertion

pub mod excel;
pub mod loader;
pub mod sanitize;

pub use excel::{Workbook, frame_from_range};
pub use loader::{LoadReport, SchemaInferringLoader, TableLoad};
pub use sanitize::{clean_cell, table_name};
