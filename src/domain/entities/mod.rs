pub mod account;
pub mod audit;
pub mod order;
pub mod signal;
