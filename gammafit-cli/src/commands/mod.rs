pub mod fit;
pub mod models;
pub mod show;
pub mod solve;
