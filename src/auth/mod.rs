pub mod cookies;
pub(crate) mod extractors;
pub mod password;
pub mod tokens;
