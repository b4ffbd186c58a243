//! Background workers

pub mod janitor;
