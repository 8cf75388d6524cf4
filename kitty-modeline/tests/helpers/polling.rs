use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 20;
const MAX_DELAY_MS: u64 = 500;

/// Error returned when waiting for file content times out.
#[derive(Debug)]
pub struct WaitError {
    path: PathBuf,
    attempts: u32,
    waited: Duration,
    last_content: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last content: {:?}",
            self.attempts,
            self.waited,
            self.path.display(),
            self.last_content.as_deref().unwrap_or("<missing>")
        )
    }
}

impl std::error::Error for WaitError {}

/// Poll a file until `predicate` accepts its (lossily decoded) content.
///
/// Backs off exponentially from 20ms up to 500ms between reads.
pub fn wait_for_file_content<P, F>(
    path: P,
    predicate: F,
    timeout: Duration,
) -> Result<String, WaitError>
where
    P: AsRef<Path>,
    F: Fn(&str) -> bool,
{
    let path = path.as_ref();
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;
    let mut last_content = None;

    loop {
        attempts += 1;
        match fs::read(path) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes).into_owned();
                if predicate(&content) {
                    return Ok(content);
                }
                last_content = Some(content);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => last_content = Some(format!("<unreadable: {}>", err)),
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError {
                path: path.to_path_buf(),
                attempts,
                waited: start.elapsed(),
                last_content,
            });
        }

        thread::sleep(delay.min(remaining));
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    }
}

/// Poll until `path` no longer exists.
pub fn wait_for_removal(path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while path.exists() {
        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(INITIAL_DELAY_MS));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wait_for_file_content_returns_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("value.txt");
        fs::write(&file, "ready").unwrap();

        let content =
            wait_for_file_content(&file, |text| text.contains("ready"), Duration::from_secs(1))
                .expect("should read file immediately");
        assert_eq!(content, "ready");
    }

    #[test]
    fn wait_for_file_content_times_out_with_context() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("missing.txt");

        let err = wait_for_file_content(&file, |_| true, Duration::from_millis(1))
            .expect_err("should time out");
        assert!(err.to_string().contains("missing.txt"));
    }
}
