pub mod analyzer;
pub mod metadata;

pub use analyzer::{extract_column_lineage, extract_table_refs, ColumnLineage, ColumnSource};
pub use metadata::{parse_metadata, strip_config_comments, ModelMetadata};
