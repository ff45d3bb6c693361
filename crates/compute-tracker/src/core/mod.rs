//! Core components of the resource tracker.

pub mod claim;
pub mod config;
pub mod device_pool;
pub mod error;
pub mod host_record;
pub mod instance;
pub mod interfaces;
pub mod numa;
pub mod oversubscription;
pub mod plugins;
pub mod tracker;
