pub mod result_set;
pub mod row;

pub use result_set::{ExecResult, OutBinds};
pub use row::{Columns, Row};
