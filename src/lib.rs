//! Gesture control for a camera ring.
//!
//! The ring streams grayscale image rows and IMU samples over BLE. Frames
//! are reassembled and classified to find the appliance being pointed at;
//! button presses and wrist tilt become toggle and level commands for it.

pub mod app;
pub mod domain;
pub mod infrastructure;
