pub mod db;
pub mod types;
pub mod vector;
