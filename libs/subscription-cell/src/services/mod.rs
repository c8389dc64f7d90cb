pub mod plans;
pub mod quota;
