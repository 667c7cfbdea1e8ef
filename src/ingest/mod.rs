pub mod hasher;
pub mod import;
pub mod scanner;
pub mod store;
