//! Units of conversion work.

use std::{
    fmt,
    time::{Duration, Instant},
};

use {
    stickerbot_common::{ErrorCode, InboundMessage},
    stickerbot_media::{ConversionOptions, StickerSource, Variant},
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle: received → validated → admitted → processing → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Received,
    Validated,
    Admitted,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One sticker conversion.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub source: StickerSource,
    pub options: ConversionOptions,
    /// Message the sticker answers; its chat receives the result.
    pub origin: InboundMessage,
    pub status: JobStatus,
    pub created_at: Instant,
}

impl Job {
    #[must_use]
    pub fn new(source: StickerSource, options: ConversionOptions, origin: InboundMessage) -> Self {
        Self {
            id: JobId::new(),
            source,
            options,
            origin,
            status: JobStatus::Received,
            created_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.source.variant()
    }

    /// Advance the lifecycle. Terminal states are final.
    pub fn advance(&mut self, status: JobStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }
}

/// Reported once per job when it leaves its worker slot.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub id: JobId,
    pub variant: Variant,
    pub status: JobStatus,
    pub duration: Duration,
    /// Time spent queued before a slot was free.
    pub waited: Duration,
    pub error: Option<ErrorCode>,
}

impl JobOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use {super::*, stickerbot_common::MediaPayload};

    #[test]
    fn terminal_status_is_final() {
        let mut job = Job::new(
            StickerSource::StaticImage(MediaPayload::new("image/png", vec![0])),
            ConversionOptions::default(),
            InboundMessage::default(),
        );
        assert_eq!(job.variant(), Variant::StaticImage);
        job.advance(JobStatus::Processing);
        job.advance(JobStatus::Failed);
        job.advance(JobStatus::Completed);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn id_displays_as_hyphenated_uuid() {
        let id = JobId::new().to_string();
        assert_eq!(id.len(), 36);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
