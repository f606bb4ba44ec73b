use crate::error::{ClipError, ClipResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifies one clip job for the lifetime of a batch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used for thread names and log prefixes.
    pub fn short(&self) -> String {
        let mut simple = self.0.simple().to_string();
        simple.truncate(8);
        simple
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// A clip the caller picked: which file and which range of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipSelection {
    pub id: JobId,
    pub source_path: PathBuf,
    pub begin_offset_ms: i64,
    pub end_offset_ms: i64,
}

impl ClipSelection {
    pub fn new(source_path: impl Into<PathBuf>, begin_offset_ms: i64, end_offset_ms: i64) -> Self {
        Self {
            id: JobId::new(),
            source_path: source_path.into(),
            begin_offset_ms,
            end_offset_ms,
        }
    }

    pub fn into_request(self, output_directory: &Path) -> ClipRequest {
        ClipRequest {
            id: self.id,
            source_path: self.source_path,
            output_directory: output_directory.to_path_buf(),
            begin_offset_ms: self.begin_offset_ms,
            end_offset_ms: self.end_offset_ms,
        }
    }
}

/// Everything a transcode job needs. Built once by the caller and never
/// mutated while the job runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipRequest {
    pub id: JobId,
    pub source_path: PathBuf,
    pub output_directory: PathBuf,
    pub begin_offset_ms: i64,
    pub end_offset_ms: i64,
}

impl ClipRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        output_directory: impl Into<PathBuf>,
        begin_offset_ms: i64,
        end_offset_ms: i64,
    ) -> Self {
        Self {
            id: JobId::new(),
            source_path: source_path.into(),
            output_directory: output_directory.into(),
            begin_offset_ms,
            end_offset_ms,
        }
    }

    pub fn validate(&self) -> ClipResult<()> {
        if self.begin_offset_ms < 0 || self.begin_offset_ms >= self.end_offset_ms {
            return Err(ClipError::InvalidRange {
                begin_ms: self.begin_offset_ms,
                end_ms: self.end_offset_ms,
            });
        }
        Ok(())
    }

    pub fn range_ms(&self) -> i64 {
        self.end_offset_ms - self.begin_offset_ms
    }
}

/// Picks a fresh file name under `directory`. The name is unrelated to the job
/// id so resubmitting the same selection never overwrites an earlier clip.
pub fn unique_output_path(directory: &Path, extension: &str) -> PathBuf {
    let name = format!("{}.{}", Uuid::new_v4().simple(), extension);
    directory.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rejects_empty_and_reversed_ranges() {
        let equal = ClipRequest::new("in.mp4", "/tmp", 1000, 1000);
        assert!(matches!(
            equal.validate(),
            Err(ClipError::InvalidRange {
                begin_ms: 1000,
                end_ms: 1000
            })
        ));

        let reversed = ClipRequest::new("in.mp4", "/tmp", 2000, 1000);
        assert!(reversed.validate().is_err());

        let negative = ClipRequest::new("in.mp4", "/tmp", -5, 1000);
        assert!(negative.validate().is_err());
    }

    #[test]
    fn accepts_forward_range() {
        let request = ClipRequest::new("in.mp4", "/tmp", 0, 1);
        assert!(request.validate().is_ok());
        assert_eq!(request.range_ms(), 1);
    }

    #[test]
    fn output_names_do_not_repeat() {
        let dir = Path::new("/out");
        let names: HashSet<PathBuf> = (0..256).map(|_| unique_output_path(dir, "webm")).collect();
        assert_eq!(names.len(), 256);
        for name in &names {
            assert_eq!(name.parent(), Some(dir));
            assert_eq!(name.extension().and_then(|e| e.to_str()), Some("webm"));
        }
    }

    #[test]
    fn selection_keeps_its_id() {
        let selection = ClipSelection::new("a.mkv", 10, 20);
        let id = selection.id;
        let request = selection.into_request(Path::new("/clips"));
        assert_eq!(request.id, id);
        assert_eq!(request.output_directory, PathBuf::from("/clips"));
    }

    #[test]
    fn short_id_is_eight_hex_digits() {
        let short = JobId::new().short();
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
