pub mod dispatcher;
pub mod ledger;
pub mod pending_reset;
pub mod scheduler;
pub mod tracker_service;

pub use dispatcher::{AlertDispatcher, DispatchOutcome, TickReport, TickTrigger};
pub use ledger::Ledger;
pub use pending_reset::PendingResetStore;
pub use scheduler::{JobScheduler, ScheduledJob};
pub use tracker_service::{TrackerParts, TrackerService};
