// Core modules: symbol binding, library loading, and error modeling.
pub mod error;
pub mod library;
pub mod symbols;
