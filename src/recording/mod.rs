pub mod backend;
pub mod captured;
pub mod session;
pub mod silence;
pub mod state;

pub use backend::{
    negotiate_encoding, AudioEncoding, CaptureFormat, CaptureStream, MicrophoneBackend,
    RecordingError,
};
pub use captured::{CapturedAudio, PlaybackRef};
pub use session::{CaptureId, RecordingEvent, RecordingOptions, RecordingSession};
pub use silence::SilenceTracker;
pub use state::{PermissionStatus, RecordingSnapshot, RecordingState};

#[cfg(test)]
pub use backend::MockMicrophone;
