//! Image Upscaler
//!
//! This library provides the job orchestration behind the image-upscaler
//! service: uploads are stored as jobs, enlarged off the request path by a
//! pluggable backend (fast resampling or a pre-trained model), and polled
//! until their result can be fetched.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;
