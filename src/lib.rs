pub mod config;
pub mod db;
pub mod model;
pub mod notion;
pub mod sync;
pub mod upstream;
