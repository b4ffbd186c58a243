//! Job progress reporting

pub mod bus;

pub use bus::{EventStatus, ProgressBus, ProgressEvent, Subscription};
