pub mod rewrite;

pub use rewrite::*;
