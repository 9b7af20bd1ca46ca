pub mod clock;
pub mod dir;
pub mod duration;
pub mod logging;
pub mod runtime;
