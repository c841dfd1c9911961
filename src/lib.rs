pub mod board;
pub mod cli;
pub mod error;
pub mod logging;
pub mod session;
pub mod settings;
pub mod store;
pub mod types;
