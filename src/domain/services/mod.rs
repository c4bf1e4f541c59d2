pub mod fifo;
pub mod session;
pub mod signal_engine;
pub mod signals;
pub mod volume_profile;
