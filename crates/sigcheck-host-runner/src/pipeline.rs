//! build → link → run.
//!
//! Every external step runs with the scenario workspace as its working
//! directory, so paths handed to the toolchain and the compiler are relative to
//! it, exactly as they would be when typed in that directory.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::error::{missing_artifact, HarnessError, Result};
use crate::process::{CommandRunner, CommandSpec, ProcessResult};
use crate::workspace::{FileGuard, Workspace};

/// Substituted with the absolute workspace path inside build flags.
pub const WORKSPACE_PLACEHOLDER: &str = "{workspace}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildVerb {
    Build,
    Install,
}

impl BuildVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildVerb::Build => "build",
            BuildVerb::Install => "install",
        }
    }
}

/// Where the toolchain leaves `<stem>.a` and `<stem>.h`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLocation {
    /// `pkg/<os>_<arch>[_shared]/` under the workspace.
    InstallCache { stem: String },
    /// The workspace root.
    Workspace { stem: String },
}

/// One `<toolchain> build|install -buildmode=c-archive` invocation.
#[derive(Debug, Clone)]
pub struct ArchiveBuild {
    pub verb: BuildVerb,
    pub flags: Vec<String>,
    pub output: Option<String>,
    pub package: String,
    pub produces: ArchiveLocation,
}

impl ArchiveBuild {
    /// `install -buildmode=c-archive <pkg>`; lands in the install cache.
    pub fn install(package: &str) -> Self {
        Self {
            verb: BuildVerb::Install,
            flags: Vec::new(),
            output: None,
            package: package.to_string(),
            produces: ArchiveLocation::InstallCache {
                stem: package.to_string(),
            },
        }
    }

    /// `build -buildmode=c-archive -o <pkg>.a <pkg>`.
    pub fn with_output(package: &str) -> Self {
        Self {
            verb: BuildVerb::Build,
            flags: Vec::new(),
            output: Some(format!("{package}.a")),
            package: package.to_string(),
            produces: ArchiveLocation::Workspace {
                stem: package.to_string(),
            },
        }
    }

    /// `build -buildmode=c-archive src/<pkg>/<pkg>.go`; named after the file.
    pub fn from_file(package: &str) -> Self {
        Self {
            verb: BuildVerb::Build,
            flags: Vec::new(),
            output: None,
            package: format!("src/{package}/{package}.go"),
            produces: ArchiveLocation::Workspace {
                stem: package.to_string(),
            },
        }
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }
}

/// Compile and link a native harness program against the last archive.
#[derive(Debug, Clone)]
pub struct LinkStep {
    /// Executable stem; the platform suffix is added.
    pub exe: String,
    pub sources: Vec<String>,
    /// Also link the per-OS main (`main_unix.c`/`main_windows.c`) and its libs.
    pub platform_main: bool,
    pub flags: Vec<String>,
}

impl LinkStep {
    pub fn new(exe: &str, sources: &[&str]) -> Self {
        Self {
            exe: exe.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            platform_main: false,
            flags: Vec::new(),
        }
    }

    pub fn with_platform_main(mut self) -> Self {
        self.platform_main = true;
        self
    }

    pub fn flags(mut self, flags: &[&str]) -> Self {
        self.flags.extend(flags.iter().map(|f| f.to_string()));
        self
    }
}

/// Static library plus header; both removed when dropped.
#[derive(Debug)]
pub struct BuildArtifact {
    /// Relative to the workspace.
    pub library: PathBuf,
    pub header: PathBuf,
    _guard: FileGuard,
}

#[derive(Debug)]
pub struct ExecutableArtifact {
    pub path: PathBuf,
    _guard: FileGuard,
}

pub struct Pipeline<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn CommandRunner,
    workspace: &'a Workspace,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        runner: &'a dyn CommandRunner,
        workspace: &'a Workspace,
    ) -> Self {
        Self {
            config,
            runner,
            workspace,
        }
    }

    /// Inherited environment with the workspace variable pointed at the
    /// workspace, plus the configured extras.
    pub fn build_env(&self) -> BTreeMap<OsString, OsString> {
        let var = OsString::from(&self.config.workspace_var);
        let mut env: BTreeMap<OsString, OsString> =
            std::env::vars_os().filter(|(k, _)| *k != var).collect();
        env.insert(var, self.workspace.path().as_os_str().to_os_string());
        for (k, v) in &self.config.build_env {
            env.insert(k.into(), v.into());
        }
        env
    }

    pub fn archive_command(&self, build: &ArchiveBuild) -> CommandSpec {
        let ws = self.workspace.path().display().to_string();
        let mut spec = CommandSpec::new(&self.config.toolchain)
            .arg(build.verb.as_str())
            .arg("-buildmode=c-archive")
            .args(
                build
                    .flags
                    .iter()
                    .map(|f| f.replace(WORKSPACE_PLACEHOLDER, &ws)),
            );
        if let Some(out) = &build.output {
            spec = spec.arg("-o").arg(out);
        }
        spec.arg(&build.package)
            .cwd(self.workspace.path())
            .env(self.build_env())
    }

    pub fn archive_paths(&self, location: &ArchiveLocation) -> (PathBuf, PathBuf) {
        let (dir, stem) = match location {
            ArchiveLocation::InstallCache { stem } => (self.config.platform.install_cache_dir(), stem),
            ArchiveLocation::Workspace { stem } => (PathBuf::new(), stem),
        };
        (dir.join(format!("{stem}.a")), dir.join(format!("{stem}.h")))
    }

    pub fn build_archive(&self, build: &ArchiveBuild) -> Result<BuildArtifact> {
        let spec = self.archive_command(build);
        let (library, header) = self.archive_paths(&build.produces);
        let guard = FileGuard::new(vec![
            self.workspace.join(&library),
            self.workspace.join(&header),
        ]);

        let res = self.runner.run(&spec)?;
        ensure_tool_success(&format!("{} {}", build.verb.as_str(), build.package), res)?;

        for path in [&library, &header] {
            let abs = self.workspace.join(path);
            if !abs.is_file() {
                return Err(missing_artifact("archive output", abs));
            }
        }
        Ok(BuildArtifact {
            library,
            header,
            _guard: guard,
        })
    }

    pub fn exe_path(&self, step: &LinkStep) -> PathBuf {
        self.workspace
            .join(self.config.platform.exe_name(&step.exe))
    }

    pub fn link_command(&self, step: &LinkStep, archive: &BuildArtifact) -> CommandSpec {
        let platform = &self.config.platform;
        let exe = self.exe_path(step);

        let mut spec = CommandSpec::new(self.config.compiler.program())
            .args(self.config.compiler.args())
            .args(platform.compiler_extra_flags())
            .arg("-I")
            .arg(platform.install_cache_dir())
            .args(&step.flags)
            .arg("-o")
            .arg(exe)
            .args(&step.sources);
        if step.platform_main {
            spec = spec.arg(platform.platform_main_source());
        }
        spec = spec.arg(&archive.library);
        if step.platform_main {
            spec = spec.args(platform.platform_link_libs());
        }
        spec.cwd(self.workspace.path())
    }

    pub fn link(&self, step: &LinkStep, archive: &BuildArtifact) -> Result<ExecutableArtifact> {
        let spec = self.link_command(step, archive);
        let path = self.exe_path(step);
        let guard = FileGuard::new(vec![path.clone()]);

        let res = self.runner.run(&spec)?;
        ensure_tool_success(&format!("link {}", step.exe), res)?;
        if !path.is_file() {
            return Err(missing_artifact("executable", path));
        }
        Ok(ExecutableArtifact {
            path,
            _guard: guard,
        })
    }

    /// The executable directly, or through the platform exec wrapper.
    pub fn run_command(&self, exe: &Path, args: &[String]) -> CommandSpec {
        let spec = match &self.config.exec_wrapper {
            Some(wrapper) => CommandSpec::new(wrapper).arg(exe),
            None => CommandSpec::new(exe),
        };
        spec.args(args).cwd(self.workspace.path())
    }

    pub fn run(&self, exe: &Path, args: &[String]) -> Result<ProcessResult> {
        self.runner.run(&self.run_command(exe, args))
    }
}

fn ensure_tool_success(step: &str, res: ProcessResult) -> Result<()> {
    if res.success() {
        return Ok(());
    }
    Err(HarnessError::ToolInvocation {
        step: step.to_string(),
        status: res.status.to_string(),
        output: res.combined_output(),
        argv: res.argv,
    })
}
