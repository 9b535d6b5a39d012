use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{HarnessError, Result};

/// Scenario-private directory; removed with everything in it on drop.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn new(prefix: &str) -> Result<Self> {
        Self::new_in(&std::env::temp_dir(), prefix)
    }

    pub fn new_in(base: &Path, prefix: &str) -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let pid = std::process::id();

        for _ in 0..10_000 {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = base.join(format!("{prefix}_{pid}_{n}"));
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(HarnessError::io_at("create workspace", &path, err)),
            }
        }
        Err(HarnessError::io(
            format!("create workspace under {}", base.display()),
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no unique directory name left",
            ),
        ))
    }

    /// A fresh workspace holding a copy of `fixtures`.
    pub fn with_fixtures(prefix: &str, fixtures: &Path) -> Result<Self> {
        let ws = Self::new(prefix)?;
        copy_dir_contents(fixtures, ws.path())?;
        Ok(ws)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path.join(rel)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Removes the listed files when dropped. Missing files are fine.
#[derive(Debug, Default)]
pub struct FileGuard {
    paths: Vec<PathBuf>,
}

impl FileGuard {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}

pub fn copy_dir_contents(src_dir: &Path, dst_dir: &Path) -> Result<()> {
    let entries =
        std::fs::read_dir(src_dir).map_err(|err| HarnessError::io_at("read_dir", src_dir, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| HarnessError::io_at("read_dir entry", src_dir, err))?;
        let src_path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|err| HarnessError::io_at("file_type", &src_path, err))?;
        copy_tree(&src_path, &dst_dir.join(entry.file_name()), &file_type)?;
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path, src_type: &std::fs::FileType) -> Result<()> {
    if src_type.is_dir() {
        std::fs::create_dir(dst).map_err(|err| HarnessError::io_at("create_dir", dst, err))?;
        return copy_dir_contents(src, dst);
    }
    if src_type.is_file() {
        std::fs::copy(src, dst).map_err(|err| {
            HarnessError::io(
                format!("copy file from {} to {}", src.display(), dst.display()),
                err,
            )
        })?;
        return Ok(());
    }
    Err(HarnessError::io_at(
        "unsupported fixture entry type",
        src,
        std::io::Error::from(std::io::ErrorKind::InvalidInput),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_is_removed_on_drop() {
        let path = {
            let ws = Workspace::new("sigcheck_ws_test").unwrap();
            std::fs::write(ws.join("f.txt"), b"x").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn fixtures_are_copied_recursively() {
        let src = Workspace::new("sigcheck_ws_src").unwrap();
        std::fs::create_dir_all(src.join("src/libgo")).unwrap();
        std::fs::write(src.join("src/libgo/libgo.go"), b"package main\n").unwrap();
        std::fs::write(src.join("main.c"), b"int main(void){return 0;}\n").unwrap();

        let ws = Workspace::with_fixtures("sigcheck_ws_dst", src.path()).unwrap();
        assert_eq!(
            std::fs::read(ws.join("src/libgo/libgo.go")).unwrap(),
            b"package main\n"
        );
        assert!(ws.join("main.c").is_file());
    }

    #[test]
    fn file_guard_ignores_missing_files() {
        let ws = Workspace::new("sigcheck_ws_guard").unwrap();
        let present = ws.join("libgo.a");
        std::fs::write(&present, b"!<arch>\n").unwrap();
        drop(FileGuard::new(vec![present.clone(), ws.join("libgo.h")]));
        assert!(!present.exists());
    }
}
