pub mod accounts;
pub mod analysis;
pub mod auth;
pub mod config;
pub mod connections;
pub mod db;
pub mod doctors;
pub mod error;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
