//! Background process control over a PID file.

use crate::error::{Error, Result};
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// start/stop/restart/status for a background daemon.
pub trait ProcessControl {
    /// Start the daemon. Fails with [`Error::AlreadyRunning`] if it is up.
    fn start(&self) -> Result<u32>;

    /// Stop the daemon. Returns false if it was not running.
    fn stop(&self) -> Result<bool>;

    fn restart(&self) -> Result<u32> {
        self.stop()?;
        self.start()
    }

    /// PID of the running daemon, if any.
    fn status(&self) -> Result<Option<u32>>;
}

/// A PID file on disk.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded PID. A missing or unreadable file means none.
    pub fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    pub fn write(&self, pid: u32) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(&self.path, format!("{}\n", pid))?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Recorded PID if that process is alive. A stale file is removed.
    pub fn running(&self) -> Result<Option<u32>> {
        match self.read() {
            Some(pid) if process_alive(pid) => Ok(Some(pid)),
            Some(pid) => {
                tracing::debug!("Removing stale pid file {:?} (pid {})", self.path, pid);
                self.remove()?;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Signal 0 probes for existence; EPERM still means the process exists.
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs only the permission/existence check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Reap `pid` if it is an exited child of ours, so it stops looking alive.
fn reap(pid: libc::pid_t) {
    // SAFETY: WNOHANG never blocks; a non-child pid just yields ECHILD.
    unsafe {
        libc::waitpid(pid, std::ptr::null_mut(), libc::WNOHANG);
    }
}

/// Runs a command detached in its own process group and tracks it through
/// a PID file.
pub struct PidFileSupervisor {
    pid_file: PidFile,
    program: PathBuf,
    args: Vec<String>,
    stop_timeout: Duration,
}

impl PidFileSupervisor {
    pub fn new<P: AsRef<Path>>(pid_file: PidFile, program: P, args: &[&str]) -> Self {
        Self {
            pid_file,
            program: program.as_ref().to_path_buf(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stop_timeout: Duration::from_secs(10),
        }
    }

    /// Supervise this executable re-run with `run`.
    pub fn current_exe(pid_file: PidFile) -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(pid_file, exe, &["run"]))
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }
}

impl ProcessControl for PidFileSupervisor {
    fn start(&self) -> Result<u32> {
        if let Some(pid) = self.pid_file.running()? {
            return Err(Error::AlreadyRunning(pid));
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()?;
        let pid = child.id();
        self.pid_file.write(pid)?;
        tracing::info!("Started {:?} with pid {}", self.program, pid);
        Ok(pid)
    }

    fn stop(&self) -> Result<bool> {
        let Some(pid) = self.pid_file.running()? else {
            tracing::info!("Not running");
            return Ok(false);
        };
        let raw = libc::pid_t::try_from(pid)
            .map_err(|_| Error::Process(format!("pid {} out of range", pid)))?;

        // SAFETY: plain signal delivery to a pid we recorded.
        if unsafe { libc::kill(raw, libc::SIGTERM) } != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(Error::Process(format!("cannot signal {}: {}", pid, err)));
            }
        }

        let deadline = Instant::now() + self.stop_timeout;
        loop {
            reap(raw);
            if !process_alive(pid) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::Process(format!(
                    "pid {} still running after {:?}",
                    pid, self.stop_timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        self.pid_file.remove()?;
        tracing::info!("Stopped pid {}", pid);
        Ok(true)
    }

    fn status(&self) -> Result<Option<u32>> {
        self.pid_file.running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn own_process_is_alive() {
        let dir = tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("responder.pid"));
        assert_eq!(pid_file.running().unwrap(), None);

        pid_file.write(std::process::id()).unwrap();
        assert_eq!(pid_file.running().unwrap(), Some(std::process::id()));
    }

    #[test]
    fn stale_pid_file_is_cleared() {
        let dir = tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("responder.pid"));

        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        pid_file.write(pid).unwrap();
        assert_eq!(pid_file.running().unwrap(), None);
        assert!(!pid_file.path().exists());
    }

    #[test]
    fn garbage_pid_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("responder.pid");
        fs::write(&path, "not a pid").unwrap();
        assert_eq!(PidFile::new(&path).read(), None);
    }

    #[test]
    fn start_stop_cycle() {
        let dir = tempdir().unwrap();
        let sup = PidFileSupervisor::new(
            PidFile::new(dir.path().join("sleep.pid")),
            "sleep",
            &["30"],
        )
        .with_stop_timeout(Duration::from_secs(5));

        let pid = sup.start().unwrap();
        assert_eq!(sup.status().unwrap(), Some(pid));
        assert!(matches!(sup.start(), Err(Error::AlreadyRunning(p)) if p == pid));

        assert!(sup.stop().unwrap());
        assert_eq!(sup.status().unwrap(), None);
        assert!(!sup.stop().unwrap());
    }
}
