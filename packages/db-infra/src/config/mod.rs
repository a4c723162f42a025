pub mod db;
pub mod fallback;
pub mod url;
