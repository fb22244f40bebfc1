//! Runtime directory helpers for activation sockets and mutex files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::workspace::WorkspaceKey;

/// Base directory for runtime artifacts (activation channels, workspace mutexes).
///
/// Uses `NEXTGALLERY_RUNTIME_DIR` if set, otherwise `$XDG_RUNTIME_DIR/nextgallery`,
/// `~/.nextgallery`, or a per-uid tmp directory.
pub(crate) fn runtime_dir() -> PathBuf {
    runtime_dir_candidates()
        .into_iter()
        .next()
        .unwrap_or_else(per_user_tmp_dir)
}

/// Ensure the runtime directory exists and is user-private.
pub(crate) fn ensure_runtime_dir() -> io::Result<PathBuf> {
    let mut last_err: Option<io::Error> = None;
    for dir in runtime_dir_candidates() {
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = fs::metadata(&dir)?.permissions().mode() & 0o777;
                    if mode != 0o700 {
                        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
                    }
                }
                return Ok(dir);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err
        .unwrap_or_else(|| io::Error::other("unable to create a writable runtime directory")))
}

fn runtime_dir_candidates() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(dir) = std::env::var("NEXTGALLERY_RUNTIME_DIR")
        && !dir.trim().is_empty()
    {
        dirs.push(PathBuf::from(dir));
        return dirs;
    }
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR")
        && !dir.trim().is_empty()
    {
        dirs.push(PathBuf::from(dir).join("nextgallery"));
    }
    if let Ok(home) = std::env::var("HOME")
        && !home.trim().is_empty()
    {
        dirs.push(PathBuf::from(home).join(".nextgallery"));
    }
    dirs.push(per_user_tmp_dir());
    dirs
}

fn per_user_tmp_dir() -> PathBuf {
    let uid = nix::unistd::geteuid();
    PathBuf::from("/tmp").join(format!("nextgallery-{}", uid))
}

/// Local duplex endpoint name for a workspace activation channel.
///
/// The host-specific prefix (the runtime directory) is applied by
/// [`channel_path`]; the name itself is the cross-platform contract.
pub(crate) fn channel_name(key: &WorkspaceKey) -> String {
    format!("codecomfy.nextgallery.{key}")
}

/// Activation channel endpoint inside a runtime directory.
pub(crate) fn channel_path(dir: &Path, key: &WorkspaceKey) -> PathBuf {
    dir.join(channel_name(key))
}

/// Workspace mutex name (system-global within the runtime directory).
pub(crate) fn mutex_name(key: &WorkspaceKey) -> String {
    format!("NextGallery_{key}")
}

/// Workspace mutex file inside a runtime directory.
pub(crate) fn mutex_path(dir: &Path, key: &WorkspaceKey) -> PathBuf {
    dir.join(mutex_name(key))
}

/// Writer-owned artifact index inside a workspace.
pub(crate) fn index_path(workspace_root: &Path) -> PathBuf {
    workspace_root
        .join(".codecomfy")
        .join("outputs")
        .join("index.json")
}

/// Base directory for configuration files.
///
/// Uses `NEXTGALLERY_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/nextgallery`
/// or `~/.config/nextgallery`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NEXTGALLERY_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("nextgallery")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_and_mutex_names_embed_the_key() {
        let key = WorkspaceKey::compute("/tmp/some-workspace").expect("key");
        let name = channel_name(&key);
        assert!(name.starts_with("codecomfy.nextgallery."));
        assert!(name.ends_with(key.as_str()));
        assert_eq!(mutex_name(&key), format!("NextGallery_{}", key.as_str()));
    }

    #[test]
    fn index_path_is_under_codecomfy_outputs() {
        let p = index_path(Path::new("/ws"));
        assert_eq!(p, Path::new("/ws/.codecomfy/outputs/index.json"));
    }
}
