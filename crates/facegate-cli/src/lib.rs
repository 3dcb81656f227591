pub mod cancel;
pub mod cli;
pub mod commands;
pub mod context;
pub mod errors;
pub mod flows;
pub mod output;
