use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::contract::DraftSubmission;
use crate::error::{CoreError, CoreResult};
use crate::store::AtomicStore;

use super::safety::{scan_diff, scan_diff_text, WarningCategory};

const SENSITIVE_MARKERS: &[&str] = &["credentials", "secret", ".key", ".pem", "password"];
const MAX_CHANGED_LINES: usize = 500;
const MAX_FILES_TOUCHED: usize = 20;
const DELETION_RATIO_LIMIT: f64 = 0.5;

/// Result of [`SandboxGate::request_draft`] / [`SandboxGate::write_draft`].
pub struct DraftInfo {
    pub draft_path: PathBuf,
    pub content_hash: String,
    pub line_count: usize,
}

/// The outcome of running [`SandboxGate::handle`] against a submission.
#[derive(Debug, Clone)]
pub enum GateDecision {
    Accept { changed_lines: usize, deletion_ratio: f64, draft_hash: String },
    Reject { reason: String },
    Escalate { reason: String },
}

/// The only interface through which worker output may reach a real file.
/// Every path argument is validated against `sandbox_dir` before any I/O —
/// there is no operation that trusts a caller-supplied path outright.
pub struct SandboxGate {
    sandbox_dir: PathBuf,
}

impl SandboxGate {
    pub fn new(sandbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_dir: sandbox_dir.into(),
        }
    }

    pub fn sandbox_dir(&self) -> &Path {
        &self.sandbox_dir
    }

    /// Copy `source` into the sandbox as `<base>.<safe_task>.draft`.
    /// `source` must resolve inside `workspace_root`.
    pub fn request_draft(
        &self,
        source: &Path,
        task_id: &str,
        workspace_root: &Path,
    ) -> CoreResult<DraftInfo> {
        let canonical_source = source
            .canonicalize()
            .map_err(|e| CoreError::resource("request_draft", e.to_string()))?;
        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|e| CoreError::resource("request_draft", e.to_string()))?;
        if !canonical_source.starts_with(&canonical_root) {
            return Err(CoreError::safety_violation(format!(
                "source {} is outside the workspace",
                source.display()
            )));
        }

        let base = source
            .file_name()
            .ok_or_else(|| CoreError::validation("source path has no file name"))?
            .to_string_lossy();
        let safe_task = sanitize_task_id(task_id);
        let draft_path = self.sandbox_dir.join(format!("{base}.{safe_task}.draft"));
        self.validate_sandbox_path(&draft_path, &[".draft"])?;

        let bytes = std::fs::read(&canonical_source)
            .map_err(|e| CoreError::resource("request_draft", e.to_string()))?;
        AtomicStore::write(&draft_path, &bytes)?;

        Ok(DraftInfo {
            content_hash: hash_hex(&bytes),
            line_count: count_lines(&bytes),
            draft_path,
        })
    }

    /// Overwrite an existing draft's content. `draft_path` must already be
    /// a validated sandbox member ending in `.draft`.
    pub fn write_draft(&self, draft_path: &Path, content: &[u8]) -> CoreResult<DraftInfo> {
        self.validate_sandbox_path(draft_path, &[".draft"])?;
        AtomicStore::write(draft_path, content)?;
        Ok(DraftInfo {
            draft_path: draft_path.to_path_buf(),
            content_hash: hash_hex(content),
            line_count: count_lines(content),
        })
    }

    pub fn read_draft(&self, draft_path: &Path) -> CoreResult<Vec<u8>> {
        self.validate_sandbox_path(draft_path, &[".draft"])?;
        AtomicStore::read(draft_path)?
            .ok_or_else(|| CoreError::resource("read_draft", "draft does not exist"))
    }

    /// Write `<safe_task>.submission.json` recording hashes, line counts,
    /// and the worker's summary of the change.
    pub fn submit_draft(
        &self,
        draft_path: &Path,
        original_path: &Path,
        task_id: &str,
        change_summary: &str,
    ) -> CoreResult<DraftSubmission> {
        self.validate_sandbox_path(draft_path, &[".draft"])?;

        let draft_bytes = AtomicStore::read(draft_path)?
            .ok_or_else(|| CoreError::resource("submit_draft", "draft does not exist"))?;
        let original_bytes = AtomicStore::read(original_path)?
            .ok_or_else(|| CoreError::resource("submit_draft", "original does not exist"))?;

        let safe_task = sanitize_task_id(task_id);
        let submission = DraftSubmission {
            task_id: task_id.to_string(),
            draft_path: draft_path.display().to_string(),
            original_path: original_path.display().to_string(),
            change_summary: change_summary.to_string(),
            submitted_at: Utc::now(),
            original_hash: hash_hex(&original_bytes),
            draft_hash: hash_hex(&draft_bytes),
            original_lines: count_lines(&original_bytes),
            draft_lines: count_lines(&draft_bytes),
        };

        let submission_path = self.submission_path(&safe_task);
        self.validate_sandbox_path(&submission_path, &[".submission.json"])?;
        AtomicStore::write(&submission_path, serde_json::to_string_pretty(&submission)?.as_bytes())?;

        Ok(submission)
    }

    /// Run the seven-step accept/reject/escalate procedure from §4.6
    /// against the submission already on disk for `task_id`.
    /// `files_touched` lets the caller fold in how many files this task has
    /// changed across its whole run, for the scope-creep check.
    pub fn handle(&self, task_id: &str, files_touched: usize) -> CoreResult<GateDecision> {
        let safe_task = sanitize_task_id(task_id);
        let submission_path = self.submission_path(&safe_task);

        let submission_bytes = AtomicStore::read(&submission_path)?
            .ok_or_else(|| CoreError::resource("gate.handle", "no submission for task"))?;
        let submission: DraftSubmission = serde_json::from_slice(&submission_bytes)?;

        let draft_path = PathBuf::from(&submission.draft_path);
        let original_path = PathBuf::from(&submission.original_path);

        let draft_bytes = AtomicStore::read(&draft_path)?
            .ok_or_else(|| CoreError::resource("gate.handle", "draft no longer exists"))?;
        let original_bytes = AtomicStore::read(&original_path)?
            .ok_or_else(|| CoreError::resource("gate.handle", "original no longer exists"))?;

        let current_original_hash = hash_hex(&original_bytes);
        if current_original_hash != submission.original_hash {
            return Ok(GateDecision::Escalate {
                reason: "the original file changed underneath this draft".to_string(),
            });
        }

        let original_text = String::from_utf8_lossy(&original_bytes);
        let draft_text = String::from_utf8_lossy(&draft_bytes);
        let diff = scan_diff(&original_text, &draft_text);
        let changed_lines = diff.added + diff.removed;
        let deletion_ratio = if submission.original_lines > 0 {
            diff.removed as f64 / submission.original_lines as f64
        } else {
            0.0
        };

        let warnings = scan_diff_text(&diff.unified_text);
        if let Some(warning) = warnings.first() {
            let kind = match warning.category {
                WarningCategory::Secret => "secret",
                WarningCategory::HardcodedHomePath => "hardcoded home path",
            };
            return Ok(GateDecision::Reject {
                reason: format!(
                    "draft contains a {kind}-shaped string at line {}: {}",
                    warning.line_number, warning.excerpt
                ),
            });
        }

        if deletion_ratio > DELETION_RATIO_LIMIT
            || changed_lines > MAX_CHANGED_LINES
            || files_touched > MAX_FILES_TOUCHED
        {
            return Ok(GateDecision::Escalate {
                reason: format!(
                    "deletion_ratio={deletion_ratio:.2} changed_lines={changed_lines} files_touched={files_touched}"
                ),
            });
        }

        Ok(GateDecision::Accept {
            changed_lines,
            deletion_ratio,
            draft_hash: submission.draft_hash,
        })
    }

    /// Apply an accepted draft: write it over the original atomically,
    /// append a `draft_applied` entry to the audit log, and remove the
    /// sandbox artifacts for this task.
    pub fn apply(&self, task_id: &str, audit_log_path: &Path) -> CoreResult<()> {
        let safe_task = sanitize_task_id(task_id);
        let submission_path = self.submission_path(&safe_task);
        let submission_bytes = AtomicStore::read(&submission_path)?
            .ok_or_else(|| CoreError::resource("gate.apply", "no submission for task"))?;
        let submission: DraftSubmission = serde_json::from_slice(&submission_bytes)?;

        let draft_path = PathBuf::from(&submission.draft_path);
        let original_path = PathBuf::from(&submission.original_path);
        let draft_bytes = AtomicStore::read(&draft_path)?
            .ok_or_else(|| CoreError::resource("gate.apply", "draft no longer exists"))?;

        AtomicStore::write(&original_path, &draft_bytes)?;

        let audit_line = serde_json::json!({
            "timestamp": Utc::now(),
            "event": "draft_applied",
            "task_id": task_id,
        });
        AtomicStore::append(audit_log_path, serde_json::to_string(&audit_line)?.as_bytes())?;

        let _ = std::fs::remove_file(&draft_path);
        let _ = std::fs::remove_file(&submission_path);
        Ok(())
    }

    fn submission_path(&self, safe_task: &str) -> PathBuf {
        self.sandbox_dir.join(format!("{safe_task}.submission.json"))
    }

    /// Rejects anything outside `sandbox_dir`, `..` components, null
    /// bytes, double-URL-encoded traversal, extensions outside the
    /// whitelist, and sensitive file names.
    fn validate_sandbox_path(&self, path: &Path, allowed_extensions: &[&str]) -> CoreResult<()> {
        let as_str = path.to_string_lossy();
        if as_str.contains('\0') {
            return Err(CoreError::safety_violation("path contains a null byte"));
        }
        let lowered = as_str.to_lowercase();
        if lowered.contains("%2e%2e") || lowered.contains("%252e") {
            return Err(CoreError::safety_violation(
                "path contains encoded directory traversal",
            ));
        }
        if path.components().any(|c| c == std::path::Component::ParentDir) {
            return Err(CoreError::safety_violation("path contains '..'"));
        }
        if path.parent() != Some(self.sandbox_dir.as_path()) {
            return Err(CoreError::safety_violation(format!(
                "path {} is outside the sandbox",
                path.display()
            )));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if !allowed_extensions.iter().any(|ext| file_name.ends_with(ext)) {
            return Err(CoreError::safety_violation(format!(
                "extension not in the sandbox whitelist: {}",
                path.display()
            )));
        }

        if file_name == ".env" || SENSITIVE_MARKERS.iter().any(|m| file_name.contains(m)) {
            return Err(CoreError::safety_violation(format!(
                "sensitive file name refused: {}",
                path.display()
            )));
        }

        Ok(())
    }
}

/// Keep only `[A-Za-z0-9_]` from a task id, per §4.6.
fn sanitize_task_id(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn hash_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn count_lines(bytes: &[u8]) -> usize {
    String::from_utf8_lossy(bytes).lines().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(dir: &Path) -> SandboxGate {
        std::fs::create_dir_all(dir).unwrap();
        SandboxGate::new(dir)
    }

    #[test]
    fn request_draft_copies_into_sandbox() {
        let workspace = tempfile::tempdir().unwrap();
        let sandbox = tempfile::tempdir().unwrap();
        let source = workspace.path().join("watchdog.py");
        std::fs::write(&source, "print('hi')\n").unwrap();

        let g = gate(sandbox.path());
        let info = g.request_draft(&source, "VER-001-VERSION", workspace.path()).unwrap();
        assert!(info.draft_path.exists());
        assert_eq!(info.line_count, 1);
    }

    #[test]
    fn request_draft_rejects_source_outside_workspace() {
        let workspace = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let sandbox = tempfile::tempdir().unwrap();
        let source = outside.path().join("evil.py");
        std::fs::write(&source, "x = 1\n").unwrap();

        let g = gate(sandbox.path());
        let err = g
            .request_draft(&source, "VER-001-VERSION", workspace.path())
            .unwrap_err();
        assert!(err.to_string().contains("safety violation"));
    }

    #[test]
    fn task_id_is_sanitized_in_filenames() {
        assert_eq!(sanitize_task_id("VER-001-VERSION"), "VER_001_VERSION");
        assert_eq!(sanitize_task_id("a/b..c"), "a_b__c");
    }

    #[test]
    fn validate_sandbox_path_rejects_traversal() {
        let sandbox = tempfile::tempdir().unwrap();
        let g = gate(sandbox.path());
        let bad = sandbox.path().join("..").join("escape.draft");
        let err = g.validate_sandbox_path(&bad, &[".draft"]).unwrap_err();
        assert!(err.to_string().contains("safety violation"));
    }

    #[test]
    fn validate_sandbox_path_rejects_sensitive_names() {
        let sandbox = tempfile::tempdir().unwrap();
        let g = gate(sandbox.path());
        let bad = sandbox.path().join("my_secret.draft");
        let err = g.validate_sandbox_path(&bad, &[".draft"]).unwrap_err();
        assert!(err.to_string().contains("sensitive"));
    }

    #[test]
    fn validate_sandbox_path_rejects_bad_extension() {
        let sandbox = tempfile::tempdir().unwrap();
        let g = gate(sandbox.path());
        let bad = sandbox.path().join("file.exe");
        let err = g.validate_sandbox_path(&bad, &[".draft"]).unwrap_err();
        assert!(err.to_string().contains("whitelist"));
    }

    #[test]
    fn end_to_end_accept_flow() {
        let workspace = tempfile::tempdir().unwrap();
        let sandbox = tempfile::tempdir().unwrap();
        let original = workspace.path().join("watchdog.py");
        std::fs::write(&original, "def run():\n    pass\n").unwrap();

        let g = gate(sandbox.path());
        let info = g.request_draft(&original, "VER-001-VERSION", workspace.path()).unwrap();
        g.write_draft(&info.draft_path, b"def run():\n    print('ok')\n").unwrap();
        g.submit_draft(&info.draft_path, &original, "VER-001-VERSION", "add print")
            .unwrap();

        let decision = g.handle("VER-001-VERSION", 1).unwrap();
        match decision {
            GateDecision::Accept { .. } => {}
            other => panic!("expected Accept, got {other:?}"),
        }

        let audit_log = sandbox.path().join("transition.ndjson");
        g.apply("VER-001-VERSION", &audit_log).unwrap();
        let applied = std::fs::read_to_string(&original).unwrap();
        assert!(applied.contains("print('ok')"));
        assert!(!info.draft_path.exists());
    }

    #[test]
    fn rejects_submission_with_secret() {
        let workspace = tempfile::tempdir().unwrap();
        let sandbox = tempfile::tempdir().unwrap();
        let original = workspace.path().join("config.py");
        std::fs::write(&original, "DEBUG = True\n").unwrap();

        let g = gate(sandbox.path());
        let info = g.request_draft(&original, "SEC-001-LEAK", workspace.path()).unwrap();
        g.write_draft(
            &info.draft_path,
            b"DEBUG = True\napi_key = \"sk-abcdef1234567890abcdef\"\n",
        )
        .unwrap();
        g.submit_draft(&info.draft_path, &original, "SEC-001-LEAK", "add key")
            .unwrap();

        let decision = g.handle("SEC-001-LEAK", 1).unwrap();
        match decision {
            GateDecision::Reject { reason } => assert!(reason.contains("secret")),
            other => panic!("expected Reject, got {other:?}"),
        }
    }

    #[test]
    fn escalates_on_destructive_deletion() {
        let workspace = tempfile::tempdir().unwrap();
        let sandbox = tempfile::tempdir().unwrap();
        let original = workspace.path().join("big.py");
        let original_content: String = (0..20).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&original, &original_content).unwrap();

        let g = gate(sandbox.path());
        let info = g.request_draft(&original, "DEL-001-BIG", workspace.path()).unwrap();
        g.write_draft(&info.draft_path, b"line 0\n").unwrap();
        g.submit_draft(&info.draft_path, &original, "DEL-001-BIG", "trim file")
            .unwrap();

        let decision = g.handle("DEL-001-BIG", 1).unwrap();
        match decision {
            GateDecision::Escalate { .. } => {}
            other => panic!("expected Escalate, got {other:?}"),
        }
    }

    #[test]
    fn escalates_when_original_changed_underneath() {
        let workspace = tempfile::tempdir().unwrap();
        let sandbox = tempfile::tempdir().unwrap();
        let original = workspace.path().join("watchdog.py");
        std::fs::write(&original, "v1\n").unwrap();

        let g = gate(sandbox.path());
        let info = g.request_draft(&original, "RACE-001-X", workspace.path()).unwrap();
        g.write_draft(&info.draft_path, b"v2\n").unwrap();
        g.submit_draft(&info.draft_path, &original, "RACE-001-X", "bump version")
            .unwrap();

        std::fs::write(&original, "v1-but-someone-else-edited-it\n").unwrap();

        let decision = g.handle("RACE-001-X", 1).unwrap();
        match decision {
            GateDecision::Escalate { reason } => assert!(reason.contains("changed underneath")),
            other => panic!("expected Escalate, got {other:?}"),
        }
    }
}
