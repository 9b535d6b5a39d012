use std::path::{Path, PathBuf};

use serde::Serialize;

/// Target OS/arch pair, spelled the way the managed toolchain spells them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The host this binary was compiled for.
    pub fn host() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "x86" => "386",
            "aarch64" => "arm64",
            "powerpc64" => "ppc64",
            "s390x" => "s390x",
            other => other,
        };
        Self::new(os, arch)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }

    pub fn exe_name(&self, stem: &str) -> String {
        format!("{stem}{}", self.exe_suffix())
    }

    /// Directory (relative to the workspace) where `install -buildmode=c-archive`
    /// drops the archive and header.
    pub fn install_cache_dir(&self) -> PathBuf {
        let mut name = format!("{}_{}", self.os, self.arch);
        let shared = match self.os.as_str() {
            "darwin" => matches!(self.arch.as_str(), "arm" | "arm64"),
            "dragonfly" | "freebsd" | "linux" | "netbsd" | "openbsd" | "solaris" => true,
            _ => false,
        };
        if shared {
            name.push_str("_shared");
        }
        Path::new("pkg").join(name)
    }

    /// Flags appended right after the tokenized base flags.
    pub fn compiler_extra_flags(&self) -> Vec<String> {
        if self.os == "darwin" {
            ["-framework", "CoreFoundation", "-framework", "Foundation"]
                .into_iter()
                .map(String::from)
                .collect()
        } else {
            Vec::new()
        }
    }

    /// The per-OS half of the install harness (`main_unix.c` / `main_windows.c`).
    pub fn platform_main_source(&self) -> &'static str {
        if self.is_windows() {
            "main_windows.c"
        } else {
            "main_unix.c"
        }
    }

    /// System libraries appended after the archive.
    pub fn platform_link_libs(&self) -> Vec<String> {
        if self.is_windows() {
            ["-lntdll", "-lws2_32", "-lwinmm"]
                .into_iter()
                .map(String::from)
                .collect()
        } else {
            Vec::new()
        }
    }

    pub fn exec_wrapper_name(&self, prefix: &str) -> String {
        format!("{prefix}_{}_{}_exec", self.os, self.arch)
    }
}

/// One documented gap: the scenario cannot run on `os` (restricted to `archs`
/// when non-empty).
#[derive(Debug, Clone, Copy)]
pub struct SkipRule {
    pub os: &'static str,
    pub archs: &'static [&'static str],
    pub reason: &'static str,
}

impl SkipRule {
    pub const fn os(os: &'static str, reason: &'static str) -> Self {
        Self {
            os,
            archs: &[],
            reason,
        }
    }

    pub const fn os_arch(os: &'static str, archs: &'static [&'static str], reason: &'static str) -> Self {
        Self { os, archs, reason }
    }

    fn matches(&self, platform: &Platform) -> bool {
        self.os == platform.os
            && (self.archs.is_empty() || self.archs.contains(&platform.arch.as_str()))
    }
}

/// Declarative platform predicate. The empty predicate applies everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct Applicability {
    pub skip: &'static [SkipRule],
}

impl Applicability {
    pub const ALL: Applicability = Applicability { skip: &[] };

    pub const fn skip_on(skip: &'static [SkipRule]) -> Self {
        Self { skip }
    }

    /// Returns the skip reason when the platform is rejected.
    pub fn evaluate(&self, platform: &Platform) -> Option<String> {
        self.skip
            .iter()
            .find(|rule| rule.matches(platform))
            .map(|rule| format!("skipping on {}/{}: {}", platform.os, platform.arch, rule.reason))
    }
}

pub fn find_in_path(prog: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_in_dirs(prog, std::env::split_paths(&path))
}

pub fn find_in_dirs(prog: &str, dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    dirs.into_iter()
        .map(|dir| dir.join(prog))
        .find(|cand| cand.is_file() && is_executable(cand))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if let Ok(meta) = std::fs::metadata(path) {
            return meta.permissions().mode() & 0o111 != 0;
        }
        false
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
