//! Plain-text log of every detected repost and its originals.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::repost::detection::RepostDetection;

/// Appends one block per detection. Writers are serialized.
#[derive(Default)]
pub struct RepostLog {
    lock: Mutex<()>,
}

impl RepostLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format one detection as it is written to the log.
    pub fn format_entry(detection: &RepostDetection) -> String {
        let mut entry = format!("Repost Image: {}\nMatching Images: \n", detection.gallery_url());
        for original in &detection.matches {
            entry.push_str(&format!("- {}\n", original.gallery_url()));
        }
        entry.push_str("\n\n");
        entry
    }

    /// Blocking append.
    pub fn append(&self, path: &Path, detection: &RepostDetection) -> std::io::Result<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(Self::format_entry(detection).as_bytes())?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repost::record_store::tests::record;

    fn detection() -> RepostDetection {
        RepostDetection {
            candidate_image_id: "new".to_string(),
            candidate_fingerprint: "0f0f".to_string(),
            matches: vec![record("old1", "a", "0f0f", 0), record("old2", "b", "0f0e", 1)],
        }
    }

    #[test]
    fn test_entry_format() {
        assert_eq!(
            RepostLog::format_entry(&detection()),
            "Repost Image: https://imgur.com/gallery/new\nMatching Images: \n\
             - https://imgur.com/gallery/old1\n- https://imgur.com/gallery/old2\n\n\n"
        );
    }

    #[test]
    fn test_append_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("repost.log");
        let log = RepostLog::new();
        log.append(&path, &detection()).unwrap();
        log.append(&path, &detection()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("Repost Image:").count(), 2);
    }
}
