//! Segment compression primitives.
//!
//! Two interchangeable implementations: [`SevenZip`] shells out to the
//! `7z` binary under a deadline, [`Gzip`] streams through `flate2`. Both
//! remove any partial output file before surfacing a failure.

use crate::error::StorageError;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Compress/decompress primitive for whole segment files.
pub trait Compressor: Send + Sync {
    /// Suffix appended to compressed copies ("7z" or "gz").
    fn suffix(&self) -> &'static str;

    /// Compress `src_dir/file_name` into `dst_dir/file_name.<suffix>`.
    /// The source file is left in place; retention reaping removes it
    /// later.
    fn compress_file(&self, src_dir: &Path, file_name: &str, dst_dir: &Path)
        -> Result<(), StorageError>;

    /// Decompress `src_dir/compressed_name` into `dst_dir`, returning the
    /// decompressed file name.
    fn decompress_file(
        &self,
        src_dir: &Path,
        compressed_name: &str,
        dst_dir: &Path,
    ) -> Result<String, StorageError>;
}

fn strip_suffix<'a>(compressed_name: &'a str, suffix: &str) -> Result<&'a str, StorageError> {
    compressed_name
        .strip_suffix(&format!(".{suffix}"))
        .ok_or_else(|| {
            StorageError::Compression(format!(
                "compressed file name {compressed_name} does not end with .{suffix}"
            ))
        })
}

fn remove_partial(path: &Path) {
    if fs::remove_file(path).is_err() {
        debug!("[archive] no partial output to remove at {}", path.display());
    }
}

/// Subprocess wrapper around the `7z` binary with a hard deadline.
pub struct SevenZip {
    max_duration: Duration,
}

impl SevenZip {
    pub fn new(max_seconds: u64) -> Self {
        Self {
            max_duration: Duration::from_secs(max_seconds.max(1)),
        }
    }

    /// Poll the child until it exits or the deadline passes; kill it on
    /// timeout.
    fn wait_with_deadline(&self, mut child: Child, what: &str) -> Result<(), StorageError> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(StorageError::Compression(format!(
                        "7z {what} exited with {status}"
                    )));
                }
                Ok(None) => {
                    if started.elapsed() >= self.max_duration {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(StorageError::Compression(format!(
                            "7z {what} exceeded deadline of {:?}",
                            self.max_duration
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(StorageError::Compression(format!(
                        "7z {what} wait failed: {e}"
                    )));
                }
            }
        }
    }
}

impl Compressor for SevenZip {
    fn suffix(&self) -> &'static str {
        "7z"
    }

    fn compress_file(
        &self,
        src_dir: &Path,
        file_name: &str,
        dst_dir: &Path,
    ) -> Result<(), StorageError> {
        let src = src_dir.join(file_name);
        let dst = dst_dir.join(format!("{file_name}.{}", self.suffix()));
        let child = Command::new("7z")
            .arg("a")
            .arg(&dst)
            .arg(&src)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StorageError::Compression(format!("failed to spawn 7z: {e}")))?;
        if let Err(e) = self.wait_with_deadline(child, "compress") {
            error!("[archive] 7z compress of {} failed: {e}", src.display());
            remove_partial(&dst);
            return Err(e);
        }
        Ok(())
    }

    fn decompress_file(
        &self,
        src_dir: &Path,
        compressed_name: &str,
        dst_dir: &Path,
    ) -> Result<String, StorageError> {
        let plain_name = strip_suffix(compressed_name, self.suffix())?;
        let src = src_dir.join(compressed_name);
        let out = dst_dir.join(plain_name);
        let child = Command::new("7z")
            .arg("e")
            .arg(&src)
            .arg(format!("-o{}", dst_dir.display()))
            .arg("-y")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StorageError::Compression(format!("failed to spawn 7z: {e}")))?;
        if let Err(e) = self.wait_with_deadline(child, "decompress") {
            error!("[archive] 7z decompress of {} failed: {e}", src.display());
            remove_partial(&out);
            return Err(e);
        }
        Ok(plain_name.to_string())
    }
}

/// Streamed gzip compression via flate2.
#[derive(Default)]
pub struct Gzip;

impl Compressor for Gzip {
    fn suffix(&self) -> &'static str {
        "gz"
    }

    fn compress_file(
        &self,
        src_dir: &Path,
        file_name: &str,
        dst_dir: &Path,
    ) -> Result<(), StorageError> {
        let src = src_dir.join(file_name);
        let dst = dst_dir.join(format!("{file_name}.{}", self.suffix()));
        let result = (|| -> Result<(), StorageError> {
            let mut reader = File::open(&src)?;
            let writer = File::create(&dst)?;
            let mut encoder =
                flate2::write::GzEncoder::new(writer, flate2::Compression::best());
            std::io::copy(&mut reader, &mut encoder)?;
            encoder.finish()?.sync_all()?;
            Ok(())
        })();
        if result.is_err() {
            remove_partial(&dst);
        }
        result
    }

    fn decompress_file(
        &self,
        src_dir: &Path,
        compressed_name: &str,
        dst_dir: &Path,
    ) -> Result<String, StorageError> {
        let plain_name = strip_suffix(compressed_name, self.suffix())?;
        let src = src_dir.join(compressed_name);
        let out = dst_dir.join(plain_name);
        let result = (|| -> Result<(), StorageError> {
            let reader = File::open(&src)?;
            let mut decoder = flate2::read::GzDecoder::new(reader);
            let mut writer = File::create(&out)?;
            std::io::copy(&mut decoder, &mut writer)?;
            writer.sync_all()?;
            Ok(())
        })();
        if let Err(e) = result {
            remove_partial(&out);
            return Err(e);
        }
        Ok(plain_name.to_string())
    }
}
