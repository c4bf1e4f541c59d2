pub mod tracker_handler;

pub use tracker_handler::{app, router, ErrorResponse};
