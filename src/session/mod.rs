//! Room session: orchestration, events, and background-task bookkeeping

pub mod events;
pub mod orchestrator;
pub mod timers;

pub use events::SessionEvent;
pub use orchestrator::RoomSession;
pub use timers::TimerSet;
