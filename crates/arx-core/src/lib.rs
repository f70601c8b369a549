//! Core types for the automation engine
//!
//! This crate provides the fundamental types shared by the rule engine and
//! the workflow dispatcher: [`Event`], [`EventType`] and the dot-addressed
//! field accessor in [`path`].

mod event;
pub mod path;

pub use event::{Event, EventOrigin, EventType};

/// Standard event types produced by devices, sensors and the platform
pub mod events {
    /// A device reported an event (button press, fault, reboot)
    pub const DEVICE_EVENT: &str = "device_event";

    /// A sensor published a new reading
    pub const SENSOR_READING: &str = "sensor_reading";

    /// A threshold rule fired for a sensor reading
    pub const THRESHOLD_BREACH: &str = "threshold_breach";

    /// A device or entity changed status
    pub const STATUS_CHANGE: &str = "status_change";

    /// Platform-level event (startup, maintenance window, ...)
    pub const SYSTEM_EVENT: &str = "system_event";

    /// All event types the dispatcher routes
    pub const ALL: [&str; 5] = [
        DEVICE_EVENT,
        SENSOR_READING,
        THRESHOLD_BREACH,
        STATUS_CHANGE,
        SYSTEM_EVENT,
    ];
}
