//! Interpreter discovery
//!
//! [`RuntimeLocator::resolve`] finds a working `Rscript`:
//!
//! 1. an explicitly configured interpreter, if any
//! 2. the path persisted by the last successful discovery
//! 3. the platform [`SearchStrategy`] candidates, in order
//! 4. on non-Windows platforms, `command -v Rscript` through the shell
//!
//! Every candidate must pass the [`RuntimeValidator`]. Invalid candidates are
//! skipped silently; only running out of candidates is an error. The first
//! candidate found by discovery is written back to the [`RuntimeStore`] so the
//! search is not repeated on the next run.

mod platform;

pub use platform::{LinuxSearch, MacSearch, Platform, SearchStrategy, WindowsSearch};

use crate::config::{Config, RuntimeConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Substrings that identify genuine `Rscript --version` output.
///
/// Older releases print "R scripting front-end version x.y.z", newer ones
/// "Rscript (R) version x.y.z".
const VERSION_SIGNATURES: &[&str] = &["R scripting front-end", "Rscript (R) version"];

// ============================================
// Persisted state
// ============================================

/// Plain-text file holding the last validated interpreter path.
#[derive(Debug, Clone)]
pub struct RuntimeStore {
    path: PathBuf,
}

impl RuntimeStore {
    /// Store at the default location (`$XDG_DATA_HOME/actilyze/runtime_path`).
    pub fn new() -> Self {
        Self::at(Config::runtime_state_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The persisted interpreter path, if one has been recorded.
    pub fn load(&self) -> Option<PathBuf> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let trimmed = content.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    /// Overwrite the persisted path. Written to a sibling temp file first and
    /// renamed into place.
    pub fn save(&self, interpreter: &Path) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, interpreter.to_string_lossy().as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Remove the persisted path. Missing state is not an error.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for RuntimeStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Validation
// ============================================

/// Decides whether a path is a usable interpreter. Never fails; an unusable
/// candidate is simply `false`.
pub trait RuntimeValidator: Send + Sync {
    fn validate(&self, candidate: &Path) -> bool;
}

/// Runs `<candidate> --version` and looks for a known signature in its output.
pub struct VersionProbe {
    timeout: Duration,
    signatures: Vec<String>,
}

impl VersionProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            signatures: VERSION_SIGNATURES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Probe that accepts output containing any of `signatures`.
    pub fn with_signatures(timeout: Duration, signatures: Vec<String>) -> Self {
        Self {
            timeout,
            signatures,
        }
    }

    /// Combined stdout and stderr of `<candidate> --version`, or `None` if it
    /// could not be launched or did not finish within the timeout.
    ///
    /// Both pipes are drained while waiting, so a chatty candidate cannot
    /// stall on a full pipe. Call from a blocking context (e.g. inside
    /// `spawn_blocking`), never from async code directly.
    fn run(&self, candidate: &Path) -> Option<String> {
        let mut cmd = tokio::process::Command::new(candidate);
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let probe = async {
            match tokio::time::timeout(self.timeout, cmd.output()).await {
                Ok(Ok(output)) => Some(output),
                Ok(Err(e)) => {
                    tracing::debug!(candidate = %candidate.display(), error = %e, "Version probe failed to start");
                    None
                }
                Err(_) => {
                    tracing::debug!(candidate = %candidate.display(), "Version probe timed out");
                    None
                }
            }
        };

        let output = block_on(probe)??;
        // R writes its version banner to stderr; accept either stream.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Some(text)
    }
}

/// Drive `future` on the surrounding runtime when called from one of its
/// blocking threads, otherwise on a throwaway current-thread runtime.
fn block_on<F: std::future::Future>(future: F) -> Option<F::Output> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.block_on(future)),
        Err(_) => match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => Some(runtime.block_on(future)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build runtime for version probe");
                None
            }
        },
    }
}

impl RuntimeValidator for VersionProbe {
    fn validate(&self, candidate: &Path) -> bool {
        if !candidate.is_file() {
            return false;
        }
        match self.run(candidate) {
            Some(output) => self.signatures.iter().any(|sig| output.contains(sig.as_str())),
            None => false,
        }
    }
}

// ============================================
// Locator
// ============================================

/// Finds, validates and remembers the interpreter path.
pub struct RuntimeLocator {
    strategy: Box<dyn SearchStrategy>,
    validator: Box<dyn RuntimeValidator>,
    store: RuntimeStore,
    preferred: Option<PathBuf>,
}

impl RuntimeLocator {
    /// Locator for the current platform using the configured timeout and override.
    pub fn new(config: &RuntimeConfig) -> Self {
        let mut locator = Self::with_parts(
            Platform::current().strategy(),
            Box::new(VersionProbe::new(Duration::from_secs(
                config.validation_timeout_secs,
            ))),
            RuntimeStore::new(),
        );
        locator.preferred = config.interpreter.clone();
        locator
    }

    /// Locator for an explicit platform (e.g. to inspect another OS's search).
    pub fn for_platform(platform: Platform, config: &RuntimeConfig) -> Self {
        let mut locator = Self::new(config);
        locator.strategy = platform.strategy();
        locator
    }

    pub fn with_parts(
        strategy: Box<dyn SearchStrategy>,
        validator: Box<dyn RuntimeValidator>,
        store: RuntimeStore,
    ) -> Self {
        Self {
            strategy,
            validator,
            store,
            preferred: None,
        }
    }

    /// Try this path before anything else.
    pub fn prefer(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.preferred = Some(interpreter.into());
        self
    }

    pub fn store(&self) -> &RuntimeStore {
        &self.store
    }

    /// Drop the persisted path so the next [`resolve`](Self::resolve) searches again.
    pub fn forget(&self) -> Result<()> {
        tracing::info!(path = %self.store.path().display(), "Forgetting persisted interpreter");
        self.store.clear()
    }

    /// Resolve a validated interpreter path.
    pub fn resolve(&self) -> Result<PathBuf> {
        let mut searched = 0;

        if let Some(preferred) = &self.preferred {
            searched += 1;
            if self.validator.validate(preferred) {
                tracing::debug!(path = %preferred.display(), "Using configured interpreter");
                return Ok(preferred.clone());
            }
            tracing::warn!(
                path = %preferred.display(),
                "Configured interpreter failed validation, falling back to discovery"
            );
        }

        if let Some(persisted) = self.store.load() {
            searched += 1;
            if self.validator.validate(&persisted) {
                tracing::debug!(path = %persisted.display(), "Using persisted interpreter");
                return Ok(persisted);
            }
            tracing::info!(path = %persisted.display(), "Persisted interpreter is no longer valid");
        }

        for candidate in self.strategy.candidates() {
            searched += 1;
            if self.validator.validate(&candidate) {
                return self.accept(candidate);
            }
        }

        if let Some(name) = self.strategy.shell_lookup() {
            searched += 1;
            if let Some(found) = shell_which(name) {
                if self.validator.validate(&found) {
                    return self.accept(found);
                }
            }
        }

        tracing::warn!(
            platform = %self.strategy.platform(),
            searched,
            "No interpreter found"
        );
        Err(Error::RuntimeNotFound { searched })
    }

    fn accept(&self, found: PathBuf) -> Result<PathBuf> {
        tracing::info!(path = %found.display(), "Discovered interpreter");
        if let Err(e) = self.store.save(&found) {
            tracing::warn!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to persist interpreter path"
            );
        }
        Ok(found)
    }
}

/// Resolve `name` on `PATH` through the login shell.
fn shell_which(name: &str) -> Option<PathBuf> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {}", name))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;

    /// Accepts exactly one path and counts how often it is asked.
    struct AcceptOnly {
        accepted: PathBuf,
        calls: Arc<AtomicUsize>,
    }

    impl RuntimeValidator for AcceptOnly {
        fn validate(&self, candidate: &Path) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            candidate == self.accepted
        }
    }

    fn locator(root: &Path, accepted: PathBuf, calls: Arc<AtomicUsize>) -> RuntimeLocator {
        RuntimeLocator::with_parts(
            Box::new(LinuxSearch::with_root(root.to_path_buf()).without_shell_fallback()),
            Box::new(AcceptOnly { accepted, calls }),
            RuntimeStore::at(root.join("state/runtime_path")),
        )
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = RuntimeStore::at(dir.path().join("nested/runtime_path"));
        assert!(store.load().is_none());

        store.save(Path::new("/opt/R/4.3.2/bin/Rscript")).unwrap();
        store.save(Path::new("/usr/bin/Rscript")).unwrap();
        assert_eq!(store.load(), Some(PathBuf::from("/usr/bin/Rscript")));

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_discovery_persists_first_valid_candidate() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("opt/R/4.2.1/bin")).unwrap();
        let target = dir.path().join("opt/R/4.2.1/bin/Rscript");
        let calls = Arc::new(AtomicUsize::new(0));

        let locator = locator(dir.path(), target.clone(), calls.clone());
        assert_eq!(locator.resolve().unwrap(), target);
        assert_eq!(locator.store().load(), Some(target.clone()));

        // Second resolve hits persisted state immediately.
        calls.store(0, Ordering::SeqCst);
        assert_eq!(locator.resolve().unwrap(), target);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        locator.forget().unwrap();
        assert!(locator.store().load().is_none());
    }

    #[test]
    fn test_for_platform_selects_strategy() {
        let config = RuntimeConfig::default();
        for platform in [Platform::Windows, Platform::MacOs, Platform::Linux] {
            let locator = RuntimeLocator::for_platform(platform, &config);
            assert_eq!(locator.strategy.platform(), platform);
        }
    }

    #[test]
    fn test_stale_persisted_path_falls_back_to_search() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("usr/local/bin/Rscript");
        let calls = Arc::new(AtomicUsize::new(0));
        let locator = locator(dir.path(), target.clone(), calls);
        locator.store().save(Path::new("/gone/Rscript")).unwrap();

        assert_eq!(locator.resolve().unwrap(), target);
        assert_eq!(locator.store().load(), Some(target));
    }

    #[test]
    fn test_exhaustion_is_runtime_not_found() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let locator = locator(dir.path(), PathBuf::from("/nowhere"), calls.clone());

        match locator.resolve() {
            Err(Error::RuntimeNotFound { searched }) => {
                assert_eq!(searched, calls.load(Ordering::SeqCst));
                assert!(searched >= 3);
            }
            other => panic!("expected RuntimeNotFound, got {:?}", other),
        }
        assert!(locator.store().load().is_none());
    }

    #[test]
    fn test_preferred_interpreter_wins() {
        let dir = TempDir::new().unwrap();
        let preferred = PathBuf::from("/custom/Rscript");
        let calls = Arc::new(AtomicUsize::new(0));
        let locator = locator(dir.path(), preferred.clone(), calls).prefer(preferred.clone());

        assert_eq!(locator.resolve().unwrap(), preferred);
        // Explicit configuration is not written to discovery state.
        assert!(locator.store().load().is_none());
    }

    #[test]
    fn test_version_probe_rejects_missing_file() {
        let probe = VersionProbe::new(Duration::from_secs(1));
        assert!(!probe.validate(Path::new("/definitely/not/here/Rscript")));
    }

    #[cfg(unix)]
    fn fake_interpreter(dir: &Path, banner: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("Rscript");
        std::fs::write(&path, format!("#!/bin/sh\necho '{}' >&2\n", banner)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_version_probe_checks_signature() {
        let good_dir = TempDir::new().unwrap();
        let bad_dir = TempDir::new().unwrap();
        let good = fake_interpreter(good_dir.path(), "Rscript (R) version 4.3.2 (2023-10-31)");
        let bad = fake_interpreter(bad_dir.path(), "Python 3.12.1");

        let probe = VersionProbe::new(Duration::from_secs(5));
        assert!(probe.validate(&good));
        assert!(!probe.validate(&bad));
    }

    #[cfg(unix)]
    #[test]
    fn test_version_probe_reads_large_output() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Rscript");
        // Well past one pipe buffer on stdout before the banner appears.
        std::fs::write(
            &path,
            "#!/bin/sh\nhead -c 300000 /dev/zero | tr '\\0' x\necho 'Rscript (R) version 4.4.1' >&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = Instant::now();
        let probe = VersionProbe::new(Duration::from_secs(5));
        assert!(probe.validate(&path));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_version_probe_inside_blocking_task() {
        let dir = TempDir::new().unwrap();
        let good = fake_interpreter(dir.path(), "R scripting front-end version 3.6.3");

        let accepted = tokio::task::spawn_blocking(move || {
            VersionProbe::new(Duration::from_secs(5)).validate(&good)
        })
        .await
        .unwrap();
        assert!(accepted);
    }

    #[cfg(unix)]
    #[test]
    fn test_version_probe_times_out() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Rscript");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = Instant::now();
        let probe = VersionProbe::new(Duration::from_millis(200));
        assert!(!probe.validate(&path));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
