use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{CaptionError, Result};

/// Lower-case extensions treated as images.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "bmp"];

pub const CAPTION_EXTENSION: &str = "txt";

/// An image that had no caption file when the tree was scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTask {
    pub image_path: PathBuf,
}

impl CaptionTask {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        caption_path(&self.image_path)
    }
}

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Sibling caption file: same directory and stem, `.txt` extension.
pub fn caption_path(image_path: &Path) -> PathBuf {
    image_path.with_extension(CAPTION_EXTENSION)
}

/// Walks `root` recursively and collects every image without a caption file.
///
/// The whole tree is walked before anything is returned. Entries are visited
/// in file-name order so repeated runs see the same sequence. A missing root,
/// a root that is not a directory, or an unreadable subdirectory is an error.
pub fn scan<P: AsRef<Path>>(root: P) -> Result<Vec<CaptionTask>> {
    let root = root.as_ref().canonicalize()?;
    if !root.is_dir() {
        return Err(CaptionError::NotADirectory(root));
    }

    let mut tasks = vec![];
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry?;
        // `Path::is_file` follows symlinks, so linked images count too.
        if !is_image_path(entry.path()) || !entry.path().is_file() {
            continue;
        }

        if caption_path(entry.path()).exists() {
            tracing::debug!("skipping {}, already captioned", entry.path().display());
            continue;
        }

        tasks.push(CaptionTask::new(entry.into_path()));
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn names(tasks: &[CaptionTask], root: &Path) -> Vec<String> {
        let root = root.canonicalize().unwrap();
        tasks
            .iter()
            .map(|t| {
                t.image_path
                    .strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn extensions_match_case_insensitively() {
        for name in ["a.jpg", "a.JPG", "a.Jpeg", "a.png", "a.WEBP", "a.bmp"] {
            assert!(is_image_path(Path::new(name)), "{name}");
        }
        for name in ["a.gif", "a.txt", "a", "a.jpg.bak", ".png.old", "jpg"] {
            assert!(!is_image_path(Path::new(name)), "{name}");
        }
    }

    #[test]
    fn caption_path_replaces_only_the_last_extension() {
        assert_eq!(
            caption_path(Path::new("/data/cat.photo.JPEG")),
            PathBuf::from("/data/cat.photo.txt")
        );
        assert_eq!(
            CaptionTask::new("/data/a.png").output_path(),
            PathBuf::from("/data/a.txt")
        );
    }

    #[test]
    fn scan_filters_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a.jpg"));
        touch(&root.join("b.PNG"));
        touch(&root.join("notes.md"));
        touch(&root.join("anim.gif"));
        touch(&root.join("done.webp"));
        touch(&root.join("done.txt"));
        touch(&root.join("nested/deeper/still/c.bmp"));
        touch(&root.join("nested/d.jpeg"));
        fs::create_dir_all(root.join("folder.jpg")).unwrap();

        let tasks = scan(root).unwrap();
        assert_eq!(
            names(&tasks, root),
            vec![
                "a.jpg",
                "b.PNG",
                "nested/d.jpeg",
                "nested/deeper/still/c.bmp"
            ]
        );
        assert!(tasks.iter().all(|t| t.image_path.is_absolute()));
    }

    #[test]
    fn scan_of_fully_captioned_tree_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.jpg"));
        touch(&dir.path().join("a.txt"));
        assert!(scan(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, CaptionError::Io(_)), "{err:?}");
    }

    #[test]
    fn file_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        touch(&file);
        let err = scan(&file).unwrap_err();
        assert!(matches!(err, CaptionError::NotADirectory(_)), "{err:?}");
    }
}
