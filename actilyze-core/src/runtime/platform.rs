//! Per-platform interpreter search strategies
//!
//! Each strategy lists candidate interpreter paths in priority order. The
//! locator validates them one by one; a strategy never touches the process
//! table itself. Every strategy is rooted at a configurable filesystem root
//! so it can be pointed at a scratch directory in tests.

use std::path::{Path, PathBuf};

/// Operating system family the search runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Platform of the running process.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// File name of the interpreter executable.
    pub fn interpreter_name(&self) -> &'static str {
        match self {
            Platform::Windows => "Rscript.exe",
            Platform::MacOs | Platform::Linux => "Rscript",
        }
    }

    /// Default search strategy rooted at the real filesystem.
    pub fn strategy(&self) -> Box<dyn SearchStrategy> {
        match self {
            Platform::Windows => Box::new(WindowsSearch::new()),
            Platform::MacOs => Box::new(MacSearch::new()),
            Platform::Linux => Box::new(LinuxSearch::new()),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Linux => write!(f, "linux"),
        }
    }
}

/// Interpreter discovery for one platform.
pub trait SearchStrategy: Send + Sync {
    fn platform(&self) -> Platform;

    /// Candidate interpreter paths, highest priority first.
    fn candidates(&self) -> Vec<PathBuf>;

    /// Interpreter name to resolve through the shell's `PATH`, if the
    /// platform supports that fallback.
    fn shell_lookup(&self) -> Option<&'static str>;
}

/// Major versions probed when enumerating version-numbered directories.
const PROBED_MAJORS: std::ops::RangeInclusive<u32> = 3..=4;
const PROBED_MINORS: std::ops::RangeInclusive<u32> = 0..=9;
const PROBED_PATCHES: std::ops::RangeInclusive<u32> = 0..=3;

fn probed_versions() -> impl Iterator<Item = String> {
    PROBED_MAJORS.rev().flat_map(|major| {
        PROBED_MINORS.rev().flat_map(move |minor| {
            PROBED_PATCHES
                .rev()
                .map(move |patch| format!("{}.{}.{}", major, minor, patch))
        })
    })
}

/// Leading dotted version in a directory name: `R-4.10.0` → `[4, 10, 0]`,
/// `4.4-arm64` → `[4, 4]`, `R-devel` → `[]`.
fn version_key(path: &Path) -> Vec<u32> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let version: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    version
        .split('.')
        .map_while(|part| part.parse().ok())
        .collect()
}

/// Existing directories under `dir` matching `pattern`, highest version
/// first. Names without a version sort after all versioned ones.
fn enumerate_dirs(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = dir.join(pattern);
    let mut found: Vec<PathBuf> = match glob::glob(&full.to_string_lossy()) {
        Ok(entries) => entries.flatten().filter(|p| p.is_dir()).collect(),
        Err(e) => {
            tracing::debug!(pattern = %full.display(), error = %e, "Invalid search pattern");
            Vec::new()
        }
    };
    found.sort_by(|a, b| version_key(b).cmp(&version_key(a)).then_with(|| b.cmp(a)));
    found
}

fn push_unique(out: &mut Vec<PathBuf>, path: PathBuf) {
    if !out.contains(&path) {
        out.push(path);
    }
}

// ============================================
// Windows
// ============================================

/// Searches `Program Files\R\R-x.y.z\bin` trees.
pub struct WindowsSearch {
    program_dirs: Vec<PathBuf>,
}

impl WindowsSearch {
    pub fn new() -> Self {
        let program_dirs = ["ProgramW6432", "ProgramFiles", "ProgramFiles(x86)"]
            .iter()
            .filter_map(|var| std::env::var_os(var).map(PathBuf::from))
            .collect::<Vec<_>>();
        if program_dirs.is_empty() {
            return Self::with_program_dirs(vec![
                PathBuf::from(r"C:\Program Files"),
                PathBuf::from(r"C:\Program Files (x86)"),
            ]);
        }
        Self::with_program_dirs(program_dirs)
    }

    pub fn with_program_dirs(program_dirs: Vec<PathBuf>) -> Self {
        Self { program_dirs }
    }
}

impl Default for WindowsSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStrategy for WindowsSearch {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let exe = Platform::Windows.interpreter_name();
        let mut out = Vec::new();

        for program_dir in &self.program_dirs {
            let vendor = program_dir.join("R");
            for install in enumerate_dirs(&vendor, "R-*") {
                push_unique(&mut out, install.join("bin").join(exe));
            }
        }

        for program_dir in &self.program_dirs {
            let vendor = program_dir.join("R");
            for version in probed_versions() {
                let bin = vendor.join(format!("R-{}", version)).join("bin");
                if bin.is_dir() {
                    push_unique(&mut out, bin.join(exe));
                }
            }
        }

        if let Some(program_dir) = self.program_dirs.first() {
            push_unique(
                &mut out,
                program_dir.join("RStudio").join("resources").join("app").join("bin").join(exe),
            );
        }

        out
    }

    fn shell_lookup(&self) -> Option<&'static str> {
        None
    }
}

// ============================================
// macOS
// ============================================

/// Searches the CRAN framework install, package managers and the IDE bundle.
pub struct MacSearch {
    root: PathBuf,
    shell_fallback: bool,
}

impl MacSearch {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            shell_fallback: true,
        }
    }

    pub fn without_shell_fallback(mut self) -> Self {
        self.shell_fallback = false;
        self
    }
}

impl Default for MacSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStrategy for MacSearch {
    fn platform(&self) -> Platform {
        Platform::MacOs
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let exe = Platform::MacOs.interpreter_name();
        let framework = self.root.join("Library/Frameworks/R.framework");
        let mut out = vec![framework.join("Resources/bin").join(exe)];

        let versions = framework.join("Versions");
        for version in enumerate_dirs(&versions, "*") {
            push_unique(&mut out, version.join("Resources/bin").join(exe));
        }
        for version in probed_versions() {
            let short = version.rsplit_once('.').map(|(mm, _)| mm).unwrap_or(&version);
            for dir in [short.to_string(), format!("{}-arm64", short)] {
                let bin = versions.join(dir).join("Resources/bin");
                if bin.is_dir() {
                    push_unique(&mut out, bin.join(exe));
                }
            }
        }

        push_unique(&mut out, self.root.join("opt/homebrew/bin").join(exe));
        push_unique(&mut out, self.root.join("usr/local/bin").join(exe));
        push_unique(
            &mut out,
            self.root
                .join("Applications/RStudio.app/Contents/Resources/app/bin")
                .join(exe),
        );
        out
    }

    fn shell_lookup(&self) -> Option<&'static str> {
        self.shell_fallback.then(|| Platform::MacOs.interpreter_name())
    }
}

// ============================================
// Linux
// ============================================

/// Searches distribution packages, `/opt/R/<version>` installs and the IDE bundle.
pub struct LinuxSearch {
    root: PathBuf,
    shell_fallback: bool,
}

impl LinuxSearch {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            shell_fallback: true,
        }
    }

    pub fn without_shell_fallback(mut self) -> Self {
        self.shell_fallback = false;
        self
    }
}

impl Default for LinuxSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStrategy for LinuxSearch {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let exe = Platform::Linux.interpreter_name();
        let mut out = vec![
            self.root.join("usr/bin").join(exe),
            self.root.join("usr/local/bin").join(exe),
        ];

        let opt = self.root.join("opt/R");
        for install in enumerate_dirs(&opt, "*") {
            push_unique(&mut out, install.join("bin").join(exe));
        }
        for version in probed_versions() {
            let bin = opt.join(&version).join("bin");
            if bin.is_dir() {
                push_unique(&mut out, bin.join(exe));
            }
        }

        push_unique(&mut out, self.root.join("usr/lib/rstudio/resources/app/bin").join(exe));
        out
    }

    fn shell_lookup(&self) -> Option<&'static str> {
        self.shell_fallback.then(|| Platform::Linux.interpreter_name())
    }
}
