pub mod resolver;
pub mod syntax;
