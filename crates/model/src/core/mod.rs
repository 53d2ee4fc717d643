pub mod identifiers;
pub mod mark;
