pub mod actuation;
pub mod classification;
pub mod frame;
pub mod gestures;
pub mod imu;
pub mod models;
pub mod settings;
