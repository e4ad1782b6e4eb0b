pub mod warehouse;

pub use warehouse::{CellValue, ColumnSchema, QueryResult, Warehouse};
