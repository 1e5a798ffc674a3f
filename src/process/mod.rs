pub mod encoder;
pub mod supervisor;

pub use encoder::{CaptureJobSpec, EncoderConfig, InputBackend, OutputFormat};
pub use supervisor::{ExitKind, ProcessExit, ProcessHandle, Supervisor};
