//! PostgreSQL target driver.
//!
//! - [`PgWriter`]: transactional DDL and batched inserts over deadpool-postgres

mod writer;

pub use writer::PgWriter;
