pub mod drone;
pub mod echo;
pub mod scheduler;
pub mod selector;
pub mod voices;

pub use drone::{drone_frequencies, ToneController, ToneEvent, TonePhase};
pub use echo::PeakEcho;
pub use scheduler::DeadlineQueue;
pub use selector::{Selection, TonePeakSelector};
pub use voices::ManualVoices;
