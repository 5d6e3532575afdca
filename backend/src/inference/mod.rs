pub mod classifier;
pub mod preprocess;
pub mod service;
