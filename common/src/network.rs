pub mod identity;
pub mod range;
