use std::path::PathBuf;
use ticker_engine::{FrameBuffer, PanelDriver, PanelError};
use tracing::{debug, info};

/// Write every Nth frame.
const PREVIEW_EVERY: u64 = 10;

fn check_size(expected: (usize, usize), frame: &FrameBuffer) -> Result<(), PanelError> {
    let actual = (frame.width(), frame.height());
    if actual != expected {
        return Err(PanelError::SizeMismatch {
            expected_w: expected.0,
            expected_h: expected.1,
            actual_w: actual.0,
            actual_h: actual.1,
        });
    }
    Ok(())
}

/// Panel that discards frames, for running without hardware or preview output.
#[derive(Debug, Default)]
pub struct HeadlessPanel {
    size: (usize, usize),
}

impl PanelDriver for HeadlessPanel {
    fn init(&mut self, width: usize, height: usize) -> Result<(), PanelError> {
        if width == 0 || height == 0 {
            return Err(PanelError::Init(format!("invalid panel size {width}x{height}")));
        }
        self.size = (width, height);
        info!(width, height, "headless panel initialised");
        Ok(())
    }

    fn write(&mut self, frame: &FrameBuffer) -> Result<(), PanelError> {
        check_size(self.size, frame)
    }
}

/// Panel that snapshots the frame into a binary PPM file.
///
/// The snapshot is replaced atomically (temp file + rename) so viewers never see a torn image.
#[derive(Debug)]
pub struct PreviewPanel {
    path: PathBuf,
    size: (usize, usize),
    frames: u64,
}

impl PreviewPanel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: (0, 0),
            frames: 0,
        }
    }
}

impl PanelDriver for PreviewPanel {
    fn init(&mut self, width: usize, height: usize) -> Result<(), PanelError> {
        if width == 0 || height == 0 {
            return Err(PanelError::Init(format!("invalid panel size {width}x{height}")));
        }
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(PanelError::Init(format!(
                    "preview directory {} does not exist",
                    parent.display()
                )));
            }
        }

        self.size = (width, height);
        self.frames = 0;
        info!(path = %self.path.display(), width, height, "preview panel initialised");
        Ok(())
    }

    fn write(&mut self, frame: &FrameBuffer) -> Result<(), PanelError> {
        check_size(self.size, frame)?;

        self.frames += 1;
        if self.frames % PREVIEW_EVERY != 0 {
            return Ok(());
        }

        let mut bytes = format!("P6\n{} {}\n255\n", frame.width(), frame.height()).into_bytes();
        bytes.extend(frame.to_rgb_bytes());

        let temp = self.path.with_extension("ppm.tmp");
        std::fs::write(&temp, &bytes)
            .and_then(|()| std::fs::rename(&temp, &self.path))
            .map_err(|error| PanelError::Write(format!("{}: {error}", self.path.display())))?;

        debug!(frame = self.frames, "preview written");
        Ok(())
    }
}
