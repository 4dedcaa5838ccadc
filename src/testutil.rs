//! Test helpers: fake encoder scripts and small recorder options
//!
//! The fake encoder is a shell script that honors the only two pieces of
//! the launch contract the orchestrator relies on: the output path is the
//! final argument, and progress lines appear on stdout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::recorder::types::RecorderOptions;

#[derive(Debug, Clone, Copy)]
pub enum FakeEncoderBehavior {
    /// Confirm, write a non-empty artifact, exit cleanly after a moment
    WriteAndExit,
    /// Confirm, create a zero-byte artifact, exit cleanly
    EmptyAndExit,
    /// Confirm, write an artifact, then exit when stdin delivers a line
    StopOnStdin,
    /// Confirm, write an artifact, then hang until killed
    Hang,
    /// Produce no output at all and hang
    Silent,
}

/// Write an executable fake encoder script into `dir` and return its path
pub fn fake_encoder(dir: &Path, behavior: FakeEncoderBehavior) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let body = match behavior {
        FakeEncoderBehavior::WriteAndExit => {
            "echo progress=started\n\
             head -c 4096 /dev/zero > \"$out\"\n\
             sleep 0.2\n\
             exit 0\n"
        }
        FakeEncoderBehavior::EmptyAndExit => {
            "echo progress=started\n\
             : > \"$out\"\n\
             exit 0\n"
        }
        FakeEncoderBehavior::StopOnStdin => {
            "echo progress=started\n\
             head -c 1024 /dev/zero > \"$out\"\n\
             read _line\n\
             exit 0\n"
        }
        FakeEncoderBehavior::Hang => {
            "echo progress=started\n\
             head -c 2048 /dev/zero > \"$out\"\n\
             exec sleep 30\n"
        }
        FakeEncoderBehavior::Silent => "exec sleep 30\n",
    };

    let script = format!(
        "#!/bin/sh\nfor a in \"$@\"; do out=\"$a\"; done\n{}",
        body
    );

    let path = dir.join(format!("fake-encoder-{}.sh", std::process::id()));
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Recorder options with timings small enough for tests
pub fn test_options(encoder_bin: &Path, recordings_dir: &Path) -> RecorderOptions {
    RecorderOptions {
        encoder_bin: encoder_bin.to_string_lossy().into_owned(),
        recordings_dir: recordings_dir.to_path_buf(),
        launch_confirm_timeout: Duration::from_millis(500),
        stop_grace: Duration::from_millis(300),
        duration_watchdog_margin: Duration::from_millis(500),
        stop_wait: Duration::from_secs(3),
        failure_streak_threshold: 3,
        backoff_base: Duration::from_millis(20),
        backoff_cap: Duration::from_millis(100),
        terminal_retention: Duration::from_secs(60),
    }
}
