pub mod patch;
pub mod quantity;
pub mod validate;
