use std::{io::Read, path::Path};

use anyhow::Context;
use jarscope::file::JarArchive;

/// Input path that stands for standard input.
pub const STDIN: &str = "-";

/// Open and decode a jar, reading standard input for [`STDIN`].
pub fn load_jar(path: &Path) -> anyhow::Result<JarArchive> {
    if path == Path::new(STDIN) {
        let mut data = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut data)
            .context("failed to read jar from standard input")?;
        return JarArchive::from_bytes(data).context("failed to load jar from standard input");
    }
    JarArchive::open(path).with_context(|| format!("failed to load jar: {}", path.display()))
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    if path == Path::new(STDIN) {
        return "<stdin>".to_string();
    }
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_display_name() {
        assert_eq!(file_display_name(Path::new("/tmp/in/gamepack.jar")), "gamepack.jar");
        assert_eq!(file_display_name(Path::new("/")), "/");
        assert_eq!(file_display_name(Path::new(STDIN)), "<stdin>");
    }
}
