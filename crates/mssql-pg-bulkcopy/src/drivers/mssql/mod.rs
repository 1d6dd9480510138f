//! Microsoft SQL Server source driver.
//!
//! - [`MssqlReader`]: catalog and row reads over a bb8-pooled Tiberius client

mod reader;

pub use reader::MssqlReader;
