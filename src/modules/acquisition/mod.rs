pub mod downloader;
pub mod events;
pub mod hasher;
pub mod lock;
pub mod manifest;
pub mod model;
pub mod publisher;
pub mod repository;
pub mod service;
pub mod strategy;
pub mod transformer;
