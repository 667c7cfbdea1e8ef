pub mod models;
pub mod query;
pub mod repo;
pub mod schema;
pub mod smart_folders;
pub mod tags;
