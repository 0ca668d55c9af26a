pub mod aggregator;
#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod decoder;
pub mod scanner;
