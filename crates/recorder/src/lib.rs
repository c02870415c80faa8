//! Session recording: turns a live tree and its change notifications into
//! a timestamped log of checkpoints and patches.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod frames;
pub mod pending;
pub mod recorder;
pub mod sink;

pub use buffer::{BufferState, FlushOutcome, MutationBuffer, Peers};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, RecorderConfig};
pub use error::{RecordError, RecorderStats, Recovered};
pub use frames::FrameRemap;
pub use pending::PendingInserts;
pub use recorder::{Recorder, RecorderState};
pub use sink::{EventLog, EventSink};
