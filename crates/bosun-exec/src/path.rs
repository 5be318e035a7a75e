//! Path translation between execution environments
//!
//! When a tool runs inside WSL while bosun runs on the Windows host, every
//! file path handed to that tool must be rewritten into WSL's view of the
//! filesystem. The translation strategy is fixed once at startup; on every
//! other platform translation is the identity function.
//!
//! Translation order for WSL: absolutize in the host environment,
//! canonicalize so legacy short ("8.3") segments expand to their long
//! form, then ask `wslpath` for the authoritative answer. A `wslpath`
//! failure degrades to a manual drive-prefix rewrite; only both failing is
//! fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bosun_core::{InstallError, Result};

use crate::runner::CommandRunner;

const WSLPATH_TIMEOUT: Duration = Duration::from_secs(10);

/// Which environment the translated path must be valid in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationMode {
    /// Tool executes in the same environment as bosun.
    Identity,
    /// Tool executes inside WSL; host paths become `/mnt/<drive>/...`.
    Wsl,
}

/// Strategy object converting host paths into the form the executing
/// environment expects.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    mode: TranslationMode,
    runner: CommandRunner,
}

impl PathTranslator {
    pub fn new(mode: TranslationMode, runner: CommandRunner) -> Self {
        Self { mode, runner }
    }

    /// Pick the strategy for the current host. Windows hosts drive helm and
    /// kubectl through WSL; everywhere else no translation is needed.
    pub fn for_host(runner: CommandRunner) -> Self {
        let mode = if cfg!(windows) {
            TranslationMode::Wsl
        } else {
            TranslationMode::Identity
        };
        Self::new(mode, runner)
    }

    pub fn mode(&self) -> TranslationMode {
        self.mode
    }

    /// Translate `path` for the target environment. The input may be
    /// relative; the output is always absolute in the target's syntax.
    pub async fn translate(&self, path: &Path, cancel: &CancellationToken) -> Result<String> {
        let absolute = absolutize(path)?;

        match self.mode {
            TranslationMode::Identity => Ok(absolute.to_string_lossy().into_owned()),
            TranslationMode::Wsl => self.translate_wsl(&absolute, cancel).await,
        }
    }

    async fn translate_wsl(&self, absolute: &Path, cancel: &CancellationToken) -> Result<String> {
        // Canonicalize to expand short/aliased segments; fall back to the
        // absolutized form for paths that do not exist yet.
        let resolved = match absolute.canonicalize() {
            Ok(p) => PathBuf::from(strip_verbatim_prefix(&p.to_string_lossy())),
            Err(_) => absolute.to_path_buf(),
        };
        let source = resolved.to_string_lossy().into_owned();

        let args = vec![
            "wslpath".to_string(),
            "-a".to_string(),
            source.replace('\\', "/"),
        ];
        match self
            .runner
            .run("wsl", &args, &HashMap::new(), WSLPATH_TIMEOUT, cancel)
            .await
        {
            Err(InstallError::Cancelled) => Err(InstallError::Cancelled),
            Ok(result) if result.success() && !result.stdout.trim().is_empty() => {
                Ok(result.stdout.trim().to_string())
            }
            Ok(result) => {
                tracing::warn!(
                    path = %source,
                    stderr = result.message(),
                    "wslpath failed, using manual rewrite"
                );
                manual_wsl_rewrite(&source).ok_or_else(|| InstallError::PathTranslation {
                    path: source.clone(),
                    message: "wslpath failed and path has no drive prefix".to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(path = %source, error = %e, "wslpath unavailable, using manual rewrite");
                manual_wsl_rewrite(&source).ok_or_else(|| InstallError::PathTranslation {
                    path: source.clone(),
                    message: "wslpath unavailable and path has no drive prefix".to_string(),
                })
            }
        }
    }
}

/// Make `path` absolute in the source environment without requiring it to
/// exist.
fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Strip the `\\?\` verbatim prefix `canonicalize` produces on Windows.
fn strip_verbatim_prefix(path: &str) -> String {
    path.strip_prefix(r"\\?\").unwrap_or(path).to_string()
}

/// Manual fallback: `C:\Users\me` becomes `/mnt/c/Users/me`. Returns None
/// for paths without a drive prefix, which the fallback cannot place in
/// WSL's filesystem.
fn manual_wsl_rewrite(path: &str) -> Option<String> {
    let bytes = path.as_bytes();
    if bytes.len() < 2 || bytes[1] != b':' || !bytes[0].is_ascii_alphabetic() {
        return None;
    }
    let drive = (bytes[0] as char).to_ascii_lowercase();
    let rest = path[2..].replace('\\', "/");
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        Some(format!("/mnt/{}", drive))
    } else {
        Some(format!("/mnt/{}/{}", drive, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_rewrite_basic() {
        assert_eq!(
            manual_wsl_rewrite(r"C:\Users\demo\values.yaml").as_deref(),
            Some("/mnt/c/Users/demo/values.yaml")
        );
    }

    #[test]
    fn test_manual_rewrite_lowercases_drive_only() {
        assert_eq!(
            manual_wsl_rewrite(r"D:\Certs\TLS.crt").as_deref(),
            Some("/mnt/d/Certs/TLS.crt")
        );
    }

    #[test]
    fn test_manual_rewrite_drive_root() {
        assert_eq!(manual_wsl_rewrite(r"C:\").as_deref(), Some("/mnt/c"));
        assert_eq!(manual_wsl_rewrite("C:").as_deref(), Some("/mnt/c"));
    }

    #[test]
    fn test_manual_rewrite_mixed_separators() {
        assert_eq!(
            manual_wsl_rewrite(r"C:\work/charts\app").as_deref(),
            Some("/mnt/c/work/charts/app")
        );
    }

    #[test]
    fn test_manual_rewrite_rejects_driveless_paths() {
        assert!(manual_wsl_rewrite(r"\\server\share\file").is_none());
        assert!(manual_wsl_rewrite("relative/path").is_none());
        assert!(manual_wsl_rewrite("").is_none());
    }

    #[test]
    fn test_strip_verbatim_prefix() {
        assert_eq!(strip_verbatim_prefix(r"\\?\C:\Temp"), r"C:\Temp");
        assert_eq!(strip_verbatim_prefix(r"C:\Temp"), r"C:\Temp");
    }

    #[tokio::test]
    async fn test_identity_mode_absolutizes() {
        let translator =
            PathTranslator::new(TranslationMode::Identity, CommandRunner::new());
        let cancel = CancellationToken::new();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("values.yaml");
        std::fs::write(&file, "a: 1").unwrap();

        let translated = translator.translate(&file, &cancel).await.unwrap();
        assert_eq!(translated, file.to_string_lossy());

        // A relative input comes back absolute and resolves to the same
        // underlying file as the original.
        let cwd = std::env::current_dir().unwrap();
        let relative = pathdiff(&file, &cwd).unwrap_or_else(|| file.clone());
        let translated = translator.translate(&relative, &cancel).await.unwrap();
        assert!(Path::new(&translated).is_absolute());
        assert_eq!(
            std::fs::canonicalize(&translated).unwrap(),
            std::fs::canonicalize(&file).unwrap()
        );
    }

    // Minimal relative-path helper for the test above; only handles the
    // case where `path` is under `base`.
    fn pathdiff(path: &Path, base: &Path) -> Option<PathBuf> {
        path.strip_prefix(base).ok().map(|p| p.to_path_buf())
    }
}
