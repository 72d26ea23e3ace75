use std::io::Write;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use crate::preprocess::open_rgb;
use crate::scan::{scan, CaptionTask};
use crate::{CaptionError, Captioner, Result};

/// An image the run gave up on.
#[derive(Debug)]
pub struct Failure {
    pub image_path: PathBuf,
    pub error: CaptionError,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub candidates: usize,
    pub captioned: usize,
    pub failures: Vec<Failure>,
}

impl RunSummary {
    pub fn nothing_to_do(&self) -> bool {
        self.candidates == 0
    }
}

/// Captions tasks one at a time with a single, already loaded captioner.
pub struct Pipeline<C> {
    captioner: C,
    progress: bool,
}

impl<C: Captioner> Pipeline<C> {
    pub fn new(captioner: C) -> Self {
        Self {
            captioner,
            progress: true,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Captions one image and writes its sibling text file. Returns the
    /// trimmed caption. Nothing is written unless every step succeeds.
    pub fn caption_one(&mut self, task: &CaptionTask) -> Result<String> {
        let image = open_rgb(&task.image_path)?;
        let caption = self.captioner.caption(&image)?;
        let caption = caption.trim();
        if caption.is_empty() {
            return Err(CaptionError::EmptyCaption);
        }

        write_caption(&task.output_path(), caption)?;
        Ok(caption.to_string())
    }

    /// Works through `tasks` in order. A failing image is logged and recorded
    /// in the summary, never fatal.
    pub fn run(&mut self, tasks: &[CaptionTask]) -> RunSummary {
        let mut summary = RunSummary {
            candidates: tasks.len(),
            ..Default::default()
        };

        let pb = self.progress_bar(tasks.len());
        for task in tasks {
            if let Some(name) = task.image_path.file_name() {
                pb.set_message(name.to_string_lossy().into_owned());
            }

            match self.caption_one(task) {
                Ok(caption) => {
                    tracing::debug!("{}: {}", task.image_path.display(), caption);
                    summary.captioned += 1;
                }
                Err(error) => {
                    pb.suspend(|| {
                        tracing::error!("Error processing {}: {}", task.image_path.display(), error)
                    });
                    summary.failures.push(Failure {
                        image_path: task.image_path.clone(),
                        error,
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        summary
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {human_pos}/{human_len} ({eta}) {wide_msg}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Scans `root` and captions everything that still needs it.
///
/// Scan failures are returned as errors. Per-image failures end up in the
/// summary.
pub fn caption_directory<P, C>(root: P, captioner: C, progress: bool) -> Result<RunSummary>
where
    P: AsRef<Path>,
    C: Captioner,
{
    let root = root.as_ref();
    tracing::info!("Scanning directory: {}", root.display());
    let tasks = scan(root)?;
    tracing::info!("Found {} images needing captions.", tasks.len());

    if tasks.is_empty() {
        tracing::info!("All images are already captioned.");
        return Ok(RunSummary::default());
    }

    tracing::info!("Generating captions...");
    let summary = Pipeline::new(captioner)
        .with_progress(progress)
        .run(&tasks);
    Ok(summary)
}

/// Writes `caption` plus a newline through a temporary file in the target
/// directory, so a failed write never leaves a partial caption behind.
fn write_caption(path: &Path, caption: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".caption-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(caption.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;

    struct Fixed(&'static str);

    impl Captioner for Fixed {
        fn caption(&mut self, _image: &RgbImage) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn image_at(path: &Path) -> CaptionTask {
        RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])).save(path).unwrap();
        CaptionTask::new(path)
    }

    #[test]
    fn caption_is_trimmed_and_newline_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let task = image_at(&dir.path().join("cat.png"));

        let mut pipeline = Pipeline::new(Fixed("\n  a cat on a sofa \t\n")).with_progress(false);
        let caption = pipeline.caption_one(&task).unwrap();

        assert_eq!(caption, "a cat on a sofa");
        assert_eq!(
            fs::read_to_string(dir.path().join("cat.txt")).unwrap(),
            "a cat on a sofa\n"
        );
    }

    #[test]
    fn unicode_captions_are_written_as_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let task = image_at(&dir.path().join("cafe.png"));

        Pipeline::new(Fixed("un café à Paris ☕"))
            .with_progress(false)
            .caption_one(&task)
            .unwrap();

        let bytes = fs::read(dir.path().join("cafe.txt")).unwrap();
        assert_eq!(bytes, "un café à Paris ☕\n".as_bytes());
    }

    #[test]
    fn empty_caption_fails_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let task = image_at(&dir.path().join("blank.png"));

        let mut pipeline = Pipeline::new(Fixed("   \n")).with_progress(false);
        let err = pipeline.caption_one(&task).unwrap_err();

        assert!(matches!(err, CaptionError::EmptyCaption), "{err:?}");
        assert!(!dir.path().join("blank.txt").exists());
    }

    #[test]
    fn no_temporary_files_are_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            image_at(&dir.path().join("a.png")),
            image_at(&dir.path().join("b.png")),
        ];

        let summary = Pipeline::new(Fixed("x")).with_progress(false).run(&tasks);
        assert_eq!(summary.captioned, 2);

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.png", "a.txt", "b.png", "b.txt"]);
    }

    #[test]
    fn write_failure_is_reported_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let task = image_at(&dir.path().join("a.png"));
        // A directory squatting on the caption path makes the rename fail.
        fs::create_dir(dir.path().join("a.txt")).unwrap();

        let summary = Pipeline::new(Fixed("x")).with_progress(false).run(&[task]);
        assert_eq!(summary.captioned, 0);
        assert_eq!(summary.failures.len(), 1);
        assert!(dir.path().join("a.txt").is_dir());
    }
}
