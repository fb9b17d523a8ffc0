pub mod models;
pub mod protocol;
pub mod registry;
pub mod settings;
