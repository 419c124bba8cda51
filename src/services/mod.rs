pub mod codec;
pub mod runner;
pub mod store;
pub mod sweeper;
pub mod upscaler;
