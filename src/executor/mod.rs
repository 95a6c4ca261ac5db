pub mod input;
pub mod service;
