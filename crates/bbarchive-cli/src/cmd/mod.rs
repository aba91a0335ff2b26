pub mod archive;
pub mod repos;
pub mod status;
