use anyhow::{Context, Result};
use env_logger::Target;
use std::io::{self, Write};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Daily log files kept before the oldest is pruned.
const MAX_LOG_FILES: usize = 14;

/// Install the global logger. Lines always go to stderr; with `log_file` they
/// are also written to a file rotated daily.
/// `RUST_LOG` controls the filter; sqlx statement logging is kept at warn.
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder
        .filter_module("sqlx", log::LevelFilter::Warn)
        .format_timestamp_millis()
        .target(target(log_file)?);

    builder.try_init().context("logger already initialised")
}

fn target(log_file: Option<&Path>) -> Result<Target> {
    Ok(match log_file {
        Some(path) => Target::Pipe(Box::new(Tee {
            console: io::stderr(),
            file: daily_appender(path)?,
        })),
        None => Target::Stderr,
    })
}

/// `logs/log.txt` is written as `logs/log.<YYYY-MM-DD>.txt`.
fn daily_appender(path: &Path) -> Result<RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .with_context(|| format!("log file {} has no file name", path.display()))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_LOG_FILES);
    if let Some(suffix) = path.extension().and_then(|ext| ext.to_str()) {
        builder = builder.filename_suffix(suffix);
    }
    builder
        .build(dir)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

/// Copies every formatted line to the console and to the file.
struct Tee<C, F> {
    console: C,
    file: F,
}

impl<C: Write, F: Write> Write for Tee<C, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // the console still gets the line when the file write fails
        let console = self.console.write_all(buf);
        self.file.write_all(buf)?;
        console.map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let console = self.console.flush();
        self.file.flush()?;
        console
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, Log, Record};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn log_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.is_file())
            .collect()
    }

    #[test]
    fn line_reaches_console_and_daily_file() {
        let dir = TempDir::new().unwrap();
        let console = SharedBuf::default();
        let tee = Tee {
            console: console.clone(),
            file: daily_appender(&dir.path().join("log.txt")).unwrap(),
        };
        let logger = env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .target(Target::Pipe(Box::new(tee)))
            .build();

        logger.log(
            &Record::builder()
                .level(Level::Info)
                .target("image_watcher")
                .args(format_args!("New image received: photo1.jpg"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .target("image_watcher")
                .args(format_args!("filtered out"))
                .build(),
        );
        logger.flush();

        assert!(console.contents().contains("New image received: photo1.jpg"));
        assert!(!console.contents().contains("filtered out"));

        let files = log_files(dir.path());
        assert_eq!(files.len(), 1);
        let written = std::fs::read_to_string(&files[0]).unwrap();
        assert!(written.contains("New image received: photo1.jpg"));
        assert!(!written.contains("filtered out"));
    }

    #[test]
    fn daily_file_is_dated_and_directory_created() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("Logs").join("service");

        let mut appender = daily_appender(&logs.join("log.txt")).unwrap();
        writeln!(appender, "heartbeat").unwrap();

        let files = log_files(&logs);
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("log."), "unexpected file name {name}");
        assert!(name.ends_with(".txt"), "unexpected file name {name}");
        // log.YYYY-MM-DD.txt
        assert_eq!(name.len(), "log.".len() + 10 + ".txt".len());
    }

    #[test]
    fn path_without_file_name_is_rejected() {
        let err = daily_appender(Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("has no file name"));
    }

    #[test]
    fn failing_file_still_writes_console() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let console = SharedBuf::default();
        let mut tee = Tee {
            console: console.clone(),
            file: Broken,
        };

        assert!(tee.write(b"Total images: 3\n").is_err());
        assert_eq!(console.contents(), "Total images: 3\n");
    }
}
