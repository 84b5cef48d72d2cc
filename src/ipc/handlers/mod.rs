pub mod assignment;
pub mod core;
pub mod customers;
pub mod locations;
pub mod owners;
pub mod sheets;
pub mod visits;
