pub mod generate;
pub mod handle;
pub mod release_name;
