//! Live Module - debounced publishing of in-progress traces
//!
//! - `FlushSchedule`: debounce + max-wait bookkeeping (pure, clock passed in)
//! - `PublishSink`: async receiver of `post_new` / `update_existing` / `finalize`
//! - `LiveSession`: builder + schedule + driver task
//! - `FlushResult`: every publish outcome, including `CALLBACK_ERROR`

mod schedule;
mod session;
mod sink;

pub use schedule::FlushSchedule;
pub use session::{
    create_live_session, LiveInput, LiveSession, LiveSessionOptions, DEFAULT_DEBOUNCE_MS,
    DEFAULT_MAX_WAIT_MS,
};
pub use sink::{FlushResult, MemorySink, PublishCall, PublishOp, PublishSink, SessionStatus};
