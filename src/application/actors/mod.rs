pub mod tick_worker;

pub use tick_worker::{spawn_tick_worker, TickHandler, TickMessage, TickRequest, TickWorker};
