pub mod db;
pub mod schema;

pub use db::{ids2str, is_locked_error, Db, Result, StorageError};
