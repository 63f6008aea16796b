pub mod constants;
pub mod integrate;
pub mod window;
