pub mod definition;
pub mod document;
