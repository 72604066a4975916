//! Output formatting module.

pub mod report;
pub mod table;

pub use report::{RunReport, save_report};
pub use table::*;
