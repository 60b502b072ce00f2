use log::info;
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

/// A sink that raw buffer contents are appended to.
pub trait ByteSink {
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Push any buffered bytes to the underlying storage.
    fn flush_sink(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteSink for Vec<u8> {
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Raw sample file. Buffers are appended back to back in completion order,
/// in the board's native interleaved layout.
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        info!("Writing samples to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::with_capacity(1 << 20, file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

impl ByteSink for FileSink {
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Copies of completed buffers, kept in completion order.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffers: Vec<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn append_copy(&mut self, bytes: &[u8]) {
        self.buffers.push(bytes.to_vec());
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn into_buffers(self) -> Vec<Vec<u8>> {
        self.buffers
    }
}

/// A sink write that failed without stopping the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkWarning {
    /// Position of the buffer in completion order, starting at 0. `None`
    /// when closing the sink failed.
    pub buffer: Option<usize>,
    pub message: String,
}

/// Next free `run<N>.bin` in `dir`, creating `dir` when missing.
pub fn next_run_file(dir: impl AsRef<Path>) -> io::Result<PathBuf> {
    let dir = dir.as_ref();
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        info!("Created output directory {}", dir.display());
    }
    let max_run = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            entry.file_name().to_str().and_then(|name| {
                name.strip_prefix("run")?
                    .strip_suffix(".bin")?
                    .parse::<usize>()
                    .ok()
            })
        })
        .max();

    let next = max_run.map_or(0, |max| max + 1);
    Ok(dir.join(format!("run{}.bin", next)))
}
