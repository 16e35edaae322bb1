pub mod abuse;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod forms;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod numbering;
pub mod permissions;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod workers;

pub use routes::create_router;
pub use workers::{default_handlers, JobHandler, Worker};
