//! Path conversion between the host filesystem and WINE drive letters.

use std::path::{Path, PathBuf};

/// Convert a Linux filesystem path to a WINE (Windows) path.
///
/// WINE maps `/` to `Z:\`, so `/home/user/file.xlsx` becomes `Z:\home\user\file.xlsx`.
pub fn linux_to_wine_path(linux_path: &Path) -> String {
    let abs = if linux_path.is_absolute() {
        linux_path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(linux_path)
    };

    // WINE maps the root filesystem to Z:
    format!("Z:{}", abs.display()).replace('/', "\\")
}

/// Convert a path reported by Excel under WINE back to a Linux path.
///
/// `Z:` is the root filesystem. Other drive letters resolve through the
/// prefix's `dosdevices` links (`C:` is normally `drive_c`).
pub fn wine_to_linux_path(wine_path: &str, wine_prefix: &Path) -> PathBuf {
    let bytes = wine_path.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    if !has_drive {
        return PathBuf::from(wine_path.replace('\\', "/"));
    }

    let drive = bytes[0].to_ascii_lowercase() as char;
    let rest = wine_path[2..].replace('\\', "/");
    let rest = rest.trim_start_matches('/');
    match drive {
        'z' => Path::new("/").join(rest),
        'c' => wine_prefix.join("drive_c").join(rest),
        other => wine_prefix
            .join("dosdevices")
            .join(format!("{other}:"))
            .join(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_linux_to_wine() {
        assert_eq!(
            linux_to_wine_path(Path::new("/home/user/book.xls")),
            "Z:\\home\\user\\book.xls"
        );
    }

    #[test]
    fn test_wine_to_linux() {
        let prefix = Path::new("/home/user/.wine");
        assert_eq!(
            wine_to_linux_path("Z:\\home\\user\\book.xls", prefix),
            PathBuf::from("/home/user/book.xls")
        );
        assert_eq!(
            wine_to_linux_path("c:\\Users\\me\\report.xlsx", prefix),
            PathBuf::from("/home/user/.wine/drive_c/Users/me/report.xlsx")
        );
        assert_eq!(
            wine_to_linux_path("D:\\share\\a.xls", prefix),
            PathBuf::from("/home/user/.wine/dosdevices/d:/share/a.xls")
        );
    }

    #[test]
    fn test_round_trip_through_z_drive() {
        let original = Path::new("/tmp/data/Quarterly Report.xlsx");
        let wine = linux_to_wine_path(original);
        assert_eq!(
            wine_to_linux_path(&wine, Path::new("/unused")),
            original.to_path_buf()
        );
    }
}
