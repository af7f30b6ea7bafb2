//! aqi-bot - An air quality notification service.
//!
//! This crate provides the core of a chat bot that reports air quality and
//! pushes alerts to subscribers:
//! - Subscription storage (SQLite)
//! - Air quality and geocoding clients (aqicn.org, Nominatim)
//! - Threshold/hysteresis notification policy
//! - Periodic notification dispatch over a delivery channel (Telegram)

pub mod air_quality;
pub mod config;
pub mod conversation;
pub mod delivery;
pub mod entity;
pub mod error;
pub mod geocode;
pub mod logging;
pub mod policy;
pub mod repository;
pub mod service;
pub mod task;
