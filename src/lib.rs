pub mod clock;
pub mod config;
pub mod dto;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod recurrence;
pub mod service;
pub mod sweeper;

pub use config::SchedulerConfig;
pub use engine::{BookingOutcome, SchedError, Scheduler};
pub use service::BookingService;
