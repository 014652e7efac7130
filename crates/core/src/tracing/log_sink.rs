use std::fs::{File, OpenOptions};
use std::io::{Read, Result as IoResult, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

use crate::error::{CoreError, CoreResult};

/// Append-only log writer that mirrors every write to three places.
///
/// 1. An in-memory buffer holding everything written since the file was
///    opened, preloaded with the file's existing contents
/// 2. Process stdout (unless created with [`LogSink::in_memory`]); write
///    errors there are ignored
/// 3. The backing log file, opened in append mode
///
/// Handles are cheap to clone and share the same underlying state, so the
/// sink can be handed both to the tracing subscriber and to the HTTP log
/// route.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<SinkState>>,
}

type Echo = Box<dyn Write + Send>;

struct SinkState {
    file: Option<File>,
    buffer: Vec<u8>,
    echo: Option<Echo>,
}

impl LogSink {
    /// Open (or create) the log file at `path` and preload its contents.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_echo(path.as_ref(), Box::new(std::io::stdout()))
    }

    fn open_with_echo(path: &Path, echo: Echo) -> CoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::log_sink(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| CoreError::log_sink(path, e))?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|e| CoreError::log_sink(path, e))?;

        Ok(Self {
            inner: Arc::new(Mutex::new(SinkState {
                file: Some(file),
                buffer,
                echo: Some(echo),
            })),
        })
    }

    /// Sink with no backing file and no stdout echo
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkState {
                file: None,
                buffer: Vec::new(),
                echo: None,
            })),
        }
    }

    /// Append raw bytes to every destination
    ///
    /// Only a failed file write is reported; the buffer always keeps `data`.
    pub fn append(&self, data: &[u8]) -> IoResult<()> {
        let mut state = self.lock();

        state.buffer.extend_from_slice(data);

        if let Some(echo) = state.echo.as_mut() {
            // stdout may be closed when the process is detached
            let _ = echo.write_all(data).and_then(|()| echo.flush());
        }

        if let Some(file) = state.file.as_mut() {
            file.write_all(data)?;
        }

        Ok(())
    }

    /// Full accumulated log, lossily decoded as UTF-8
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock().buffer).into_owned()
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        if let Some(file) = self.lock().file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
