pub mod engine;
pub mod handle;
mod inline;
pub mod sandbox;
