pub mod gateway;
pub mod registry;
pub mod schema;
pub mod types;
