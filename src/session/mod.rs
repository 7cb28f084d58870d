//! Per-connection session handling: state, segmentation, interim stability
//! and the session task that ties them to the scheduler.

pub mod actor;
pub mod segmenter;
pub mod stability;
pub mod state;

pub use actor::{
    SessionActor, SessionContext, SessionEnd, SessionInput, SessionOverrides, SessionSummary,
};
pub use segmenter::{FinalizationPolicy, InterimGate, LinearFinalization, UtteranceSegmenter};
pub use stability::StabilityTracker;
pub use state::{SessionId, SessionState, VadState};
