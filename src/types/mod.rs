mod models;
mod table;
pub mod value;

pub use models::*;
pub use table::*;
pub use value::{BlobEncoding, RowData, SqlValue};
