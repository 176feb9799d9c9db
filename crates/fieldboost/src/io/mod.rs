pub mod csv_table;

pub use csv_table::{read_csv, write_csv, CsvTableConfig};
