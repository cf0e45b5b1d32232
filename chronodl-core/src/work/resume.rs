//! Resume policy (§4.6, §8 property 2 "idempotent resume").
//!
//! Grounded on the original Python `main/work_manager.py::check_work_status`.

use std::path::Path;

use crate::config::ResumeMode;

use super::record::{WorkRecord, WorkStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    Proceed,
    Skip { reason: String },
}

/// Evaluates the resume policy for one work directory, reading `work.json`
/// only when the mode requires it. A missing or unparsable `work.json` is
/// always treated as "proceed" — there is nothing to resume from.
pub fn check_resume(work_dir: &Path, mode: ResumeMode) -> ResumeDecision {
    match mode {
        ResumeMode::ReprocessAll => ResumeDecision::Proceed,
        ResumeMode::SkipCompleted => {
            let work_json = work_dir.join("work.json");
            match WorkRecord::read(&work_json) {
                Ok(record) if record.status == WorkStatus::Completed => {
                    ResumeDecision::Skip {
                        reason: "status=completed".to_string(),
                    }
                }
                _ => ResumeDecision::Proceed,
            }
        }
        ResumeMode::SkipIfHasObjects => {
            let objects_dir = work_dir.join("objects");
            let has_objects = std::fs::read_dir(&objects_dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
            if has_objects {
                ResumeDecision::Skip {
                    reason: "objects/ already has content".to_string(),
                }
            } else {
                ResumeDecision::Proceed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::record::WorkInput;
    use chrono::Utc;
    use serde_json::json;

    // ==== reprocess_all ====

    #[test]
    fn reprocess_all_never_skips() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(check_resume(dir.path(), ResumeMode::ReprocessAll), ResumeDecision::Proceed);
    }

    // ==== skip_completed ====

    #[test]
    fn skip_completed_skips_when_status_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = WorkRecord::new_pending(
            WorkInput {
                title: "T".to_string(),
                creator: None,
                entry_id: None,
            },
            json!({}),
            Utc::now(),
        );
        record.transition(WorkStatus::Completed, Utc::now()).unwrap();
        record.write(&dir.path().join("work.json")).unwrap();

        assert!(matches!(check_resume(dir.path(), ResumeMode::SkipCompleted), ResumeDecision::Skip { .. }));
    }

    #[test]
    fn skip_completed_proceeds_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(check_resume(dir.path(), ResumeMode::SkipCompleted), ResumeDecision::Proceed);
    }

    #[test]
    fn skip_completed_proceeds_when_status_is_not_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = WorkRecord::new_pending(
            WorkInput {
                title: "T".to_string(),
                creator: None,
                entry_id: None,
            },
            json!({}),
            Utc::now(),
        );
        record.transition(WorkStatus::Failed, Utc::now()).unwrap();
        record.write(&dir.path().join("work.json")).unwrap();
        assert_eq!(check_resume(dir.path(), ResumeMode::SkipCompleted), ResumeDecision::Proceed);
    }

    // ==== skip_if_has_objects ====

    #[test]
    fn skip_if_has_objects_skips_when_objects_present() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        std::fs::create_dir_all(&objects).unwrap();
        std::fs::write(objects.join("file.pdf"), b"data").unwrap();
        assert!(matches!(
            check_resume(dir.path(), ResumeMode::SkipIfHasObjects),
            ResumeDecision::Skip { .. }
        ));
    }

    #[test]
    fn skip_if_has_objects_proceeds_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("objects")).unwrap();
        assert_eq!(check_resume(dir.path(), ResumeMode::SkipIfHasObjects), ResumeDecision::Proceed);
    }
}
