pub mod bluetooth;
pub mod frame_sink;
pub mod logging;
