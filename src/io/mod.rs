//! On-disk tables and the differential expression result type

mod results;
mod tables;

pub use results::{DeRow, DeTable, ResultsSummary};
pub use tables::{
    read_count_matrix, read_de_table, read_metadata, read_records, read_stabilized,
    write_count_matrix, write_de_table, write_records, write_stabilized, Record, GENE_COLUMN,
};
