pub mod train;
pub mod validate;
