pub mod env_file;
pub mod runtime;
