pub mod command;
pub mod driver;
pub mod frame;

pub use command::{Command, cmdline};
pub use driver::{FrameRead, FrameRun, ReadOutcome, SessionDriver, Timeouts};
pub use frame::{FrameHeader, Stream, encode_frame};
