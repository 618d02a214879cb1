pub mod artifact;
pub mod validator;

pub use artifact::build_artifact;
#[cfg(test)]
pub use artifact::parse_artifact;
pub use validator::parse_table;
