pub mod grid;
pub mod machine;
pub mod parse;
pub mod timing;
pub mod types;
