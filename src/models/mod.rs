pub mod job;
pub mod options;
pub mod upscale;
