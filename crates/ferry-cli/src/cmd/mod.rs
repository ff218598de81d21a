pub mod completions;
pub mod history;
pub mod migrate;
