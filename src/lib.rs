//! Attendance check-in - QR scanning client for an attendance backend
//!
//! This library decodes student QR identities from a camera feed, submits
//! each scan to the attendance REST backend at most once per cooldown, and
//! renders the QR codes students present.

pub mod api;
pub mod config;
pub mod models;
pub mod scanner;
pub mod services;
