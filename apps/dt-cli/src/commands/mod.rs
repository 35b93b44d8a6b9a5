pub mod actions;
pub mod audit;
pub mod export;
