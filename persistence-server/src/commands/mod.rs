pub mod operator;
pub mod resources;
pub mod status;
