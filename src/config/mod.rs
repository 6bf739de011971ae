pub mod generation;
pub mod prompt;
