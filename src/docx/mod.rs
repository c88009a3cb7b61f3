pub mod analyze;
pub mod normalize;
pub mod package;
pub mod repair;
pub mod substitute;
