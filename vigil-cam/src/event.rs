//! The event vocabulary and the static dispatch table.
//!
//! Every observable side effect of the pipeline flows through here: the
//! state machine (and the camera loop's timers) produce event calls, and
//! the table fans each call out to its handlers in a fixed, observable
//! order.

use yuv_frame::Frame;

/// The closed set of event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    FileCreate,
    MotionDetected,
    FirstMotion,
    EndMotion,
    Stop,
    Timelapse,
    TimelapseEnd,
    StreamTick,
    ImageDetected,
    ImagemDetected,
    ImageSnapshot,
    ImageFrame,
    ImagemFrame,
    FileClose,
    AreaDetected,
    CameraLost,
    CameraFound,
    FfmpegPut,
}

bitflags::bitflags! {
    /// What kind of file an event call refers to. Flags, so handlers can
    /// match several at once.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FileType: u8 {
        const IMAGE           = 0b000001;
        const IMAGE_SNAPSHOT  = 0b000010;
        const IMAGE_MOTION    = 0b000100;
        const MOVIE           = 0b001000;
        const MOVIE_MOTION    = 0b010000;
        const MOVIE_TIMELAPSE = 0b100000;
    }
}

impl FileType {
    pub const IMAGE_ANY: FileType = FileType::IMAGE
        .union(FileType::IMAGE_SNAPSHOT)
        .union(FileType::IMAGE_MOTION);
    pub const MOVIE_ANY: FileType = FileType::MOVIE
        .union(FileType::MOVIE_MOTION)
        .union(FileType::MOVIE_TIMELAPSE);

    /// Numeric form for `%n` templates and SQL logging.
    pub fn code(&self) -> u32 {
        self.bits() as u32
    }
}

/// One event dispatch. Borrowed views only; handlers copy what they must
/// keep.
pub struct EventCall<'a> {
    pub kind: EventKind,
    /// Missing for kinds that carry no image (`CameraLost`, `Stop`,
    /// `FileClose`, the timelapse pair); every handler tolerates `None`.
    pub image: Option<&'a Frame>,
    pub filename: Option<&'a str>,
    pub file_type: Option<FileType>,
    pub ts: chrono::DateTime<chrono::Local>,
}

impl<'a> EventCall<'a> {
    pub fn bare(kind: EventKind, ts: chrono::DateTime<chrono::Local>) -> Self {
        Self {
            kind,
            image: None,
            filename: None,
            file_type: None,
            ts,
        }
    }

    pub fn with_image(
        kind: EventKind,
        image: &'a Frame,
        ts: chrono::DateTime<chrono::Local>,
    ) -> Self {
        Self {
            kind,
            image: Some(image),
            filename: None,
            file_type: None,
            ts,
        }
    }
}

/// A follow-up call produced by a handler (movie driver announcing its
/// file, extpipe closing). Follow-ups never carry an image.
#[derive(Clone, Debug, PartialEq)]
pub struct FollowUp {
    pub kind: EventKind,
    pub filename: String,
    pub file_type: FileType,
}

/// Identifies a handler in the table; dispatch resolves these against the
/// per-camera handler state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerId {
    SqlNewFile,
    ShellOnPictureSave,
    LogNewFile,
    Beep,
    ShellOnMotionDetected,
    ShellOnAreaDetected,
    SqlFirstMotion,
    ShellOnEventStart,
    MovieOpen,
    ExtpipeOpen,
    ShellOnEventEnd,
    MovieClose,
    ExtpipeClose,
    ImageWriter,
    MoviePut,
    ExtpipePut,
    MotionImageWriter,
    SnapshotWriter,
    LoopbackPut,
    LoopbackMotionPut,
    StreamPut,
    ShellOnMovieEnd,
    SqlFileClose,
    TimelapsePut,
    TimelapseClose,
    ShellOnCameraLost,
    ShellOnCameraFound,
    StreamStop,
}

/// The ordered dispatch table. Order within one event kind is part of the
/// external contract (the SQL logger sees a new file before the user's
/// shell hook does, and so on).
pub const HANDLER_TABLE: &[(EventKind, HandlerId)] = &[
    (EventKind::FileCreate, HandlerId::SqlNewFile),
    (EventKind::FileCreate, HandlerId::ShellOnPictureSave),
    (EventKind::FileCreate, HandlerId::LogNewFile),
    (EventKind::MotionDetected, HandlerId::Beep),
    (EventKind::MotionDetected, HandlerId::ShellOnMotionDetected),
    (EventKind::AreaDetected, HandlerId::ShellOnAreaDetected),
    (EventKind::FirstMotion, HandlerId::SqlFirstMotion),
    (EventKind::FirstMotion, HandlerId::ShellOnEventStart),
    (EventKind::FirstMotion, HandlerId::MovieOpen),
    (EventKind::FirstMotion, HandlerId::ExtpipeOpen),
    (EventKind::EndMotion, HandlerId::ShellOnEventEnd),
    (EventKind::EndMotion, HandlerId::MovieClose),
    (EventKind::EndMotion, HandlerId::ExtpipeClose),
    (EventKind::ImageDetected, HandlerId::ImageWriter),
    (EventKind::ImageDetected, HandlerId::MoviePut),
    (EventKind::ImageDetected, HandlerId::ExtpipePut),
    (EventKind::ImagemDetected, HandlerId::MotionImageWriter),
    (EventKind::ImageSnapshot, HandlerId::SnapshotWriter),
    (EventKind::ImageFrame, HandlerId::LoopbackPut),
    (EventKind::ImagemFrame, HandlerId::LoopbackMotionPut),
    (EventKind::StreamTick, HandlerId::StreamPut),
    (EventKind::FfmpegPut, HandlerId::MoviePut),
    (EventKind::FfmpegPut, HandlerId::ExtpipePut),
    (EventKind::FileClose, HandlerId::ShellOnMovieEnd),
    (EventKind::FileClose, HandlerId::SqlFileClose),
    (EventKind::Timelapse, HandlerId::TimelapsePut),
    (EventKind::TimelapseEnd, HandlerId::TimelapseClose),
    (EventKind::CameraLost, HandlerId::ShellOnCameraLost),
    (EventKind::CameraFound, HandlerId::ShellOnCameraFound),
    (EventKind::Stop, HandlerId::StreamStop),
];

/// Handlers registered for `kind`, in table order.
pub fn handlers_for(kind: EventKind) -> impl Iterator<Item = HandlerId> {
    HANDLER_TABLE
        .iter()
        .filter(move |(k, _)| *k == kind)
        .map(|(_, h)| *h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_create_order() {
        // SQL logging runs before the user's shell hook; observable order.
        let order: Vec<HandlerId> = handlers_for(EventKind::FileCreate).collect();
        assert_eq!(
            order,
            vec![
                HandlerId::SqlNewFile,
                HandlerId::ShellOnPictureSave,
                HandlerId::LogNewFile
            ]
        );
    }

    #[test]
    fn test_first_motion_order() {
        let order: Vec<HandlerId> = handlers_for(EventKind::FirstMotion).collect();
        assert_eq!(
            order,
            vec![
                HandlerId::SqlFirstMotion,
                HandlerId::ShellOnEventStart,
                HandlerId::MovieOpen,
                HandlerId::ExtpipeOpen,
            ]
        );
    }

    #[test]
    fn test_filetype_masks() {
        assert!(FileType::IMAGE_ANY.contains(FileType::IMAGE_SNAPSHOT));
        assert!(FileType::MOVIE_ANY.contains(FileType::MOVIE_TIMELAPSE));
        assert!(!FileType::MOVIE_ANY.contains(FileType::IMAGE));
        assert_eq!(FileType::MOVIE.code(), 8);
    }
}
