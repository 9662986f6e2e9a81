use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use faultline_protocol::types::GlitchParameter;

/// Where captured payloads are persisted. A sink is opened once per
/// successful capture and dropped (closed) when the dump ends, whatever the
/// outcome.
pub trait PayloadStore {
    type Sink: Write;

    fn open(&mut self, point: GlitchParameter) -> io::Result<Self::Sink>;

    /// Human-readable location of the payload for `point`.
    fn location(&self, point: GlitchParameter) -> Option<String>;
}

/// Writes payloads to a file, either overwriting one path or one file per
/// phase-1 point (`<stem>-<offset>-<width>.<ext>`).
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    per_point: bool,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            per_point: false,
        }
    }

    pub fn per_point(mut self, per_point: bool) -> Self {
        self.per_point = per_point;
        self
    }

    pub fn path_for(&self, point: GlitchParameter) -> PathBuf {
        if !self.per_point {
            return self.path.clone();
        }
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "payload".to_string());
        let name = match self.path.extension() {
            Some(ext) => format!(
                "{stem}-{}-{}.{}",
                point.offset,
                point.width,
                ext.to_string_lossy()
            ),
            None => format!("{stem}-{}-{}", point.offset, point.width),
        };
        match self.path.parent() {
            Some(parent) => parent.join(name),
            None => Path::new(&name).to_path_buf(),
        }
    }
}

impl PayloadStore for FileStore {
    type Sink = BufWriter<File>;

    fn open(&mut self, point: GlitchParameter) -> io::Result<Self::Sink> {
        let path = self.path_for(point);
        tracing::info!(path = %path.display(), "dumping payload");
        Ok(BufWriter::new(File::create(path)?))
    }

    fn location(&self, point: GlitchParameter) -> Option<String> {
        Some(self.path_for(point).display().to_string())
    }
}

/// Keeps payloads only in the sweep report.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardStore;

impl PayloadStore for DiscardStore {
    type Sink = io::Sink;

    fn open(&mut self, _point: GlitchParameter) -> io::Result<Self::Sink> {
        Ok(io::sink())
    }

    fn location(&self, _point: GlitchParameter) -> Option<String> {
        None
    }
}
