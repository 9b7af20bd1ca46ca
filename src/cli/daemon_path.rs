use std::path::PathBuf;

/// Path of the `glass-daemon` executable installed next to `path`.
pub fn to_daemon_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name("glass-daemon");
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}
