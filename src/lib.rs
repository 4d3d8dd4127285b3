pub mod access;
pub mod analysis;
pub mod combine;
pub mod config;
pub mod database;
pub mod error;
pub mod features;
pub mod http_server;
pub mod image_gen;
pub mod jobs;
pub mod polling;
pub mod rate_limiter;
pub mod styles;
pub mod upload;
pub mod video_gen;
pub mod workflow;
