pub mod db;

pub use db::{AsyncDb, Db};
