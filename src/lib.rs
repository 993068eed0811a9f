pub mod config;
pub mod db;
pub mod error;
pub mod game;
pub mod mission;
pub mod protocol;
pub mod routes;
