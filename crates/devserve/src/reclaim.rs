//! Port reclaim: stop whatever is already listening on the server port
//!
//! Reclaim is a convenience for the edit-build-reload loop, where an old
//! server instance is often still running. It is strictly best-effort:
//! every failure is logged and reported, none is fatal. If the port is
//! still taken afterwards the bind step reports it.
//!
//! The OS-specific part sits behind [`PortInspector`]:
//!
//! - unix: `lsof` lists listening pids, `SIGKILL` stops them
//! - windows: `netstat -ano` lists listening pids, `taskkill /F` stops them

use std::process::Command;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Reclaim failure; always advisory
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// The socket table could not be read
    #[error("could not inspect listeners on port {port}: {reason}")]
    Inspect { port: u16, reason: String },

    /// A process could not be stopped
    #[error("could not stop process {pid}: {reason}")]
    Terminate { pid: u32, reason: String },

    /// No inspector exists for this platform
    #[error("port reclaim is not supported on this platform")]
    Unsupported,
}

/// Platform capability for finding and stopping port listeners
pub trait PortInspector: Send + Sync {
    /// Short name for log lines
    fn name(&self) -> &'static str;

    /// Pids of processes listening on `port`
    ///
    /// An empty list means the port is free.
    fn listeners(&self, port: u16) -> Result<Vec<u32>, ReclaimError>;

    /// Forcibly stop `pid`
    fn terminate(&self, pid: u32) -> Result<(), ReclaimError>;
}

/// Inspector for the current target
pub fn platform_inspector() -> Box<dyn PortInspector> {
    #[cfg(unix)]
    {
        Box::new(LsofInspector)
    }
    #[cfg(windows)]
    {
        Box::new(NetstatInspector)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Box::new(UnsupportedInspector)
    }
}

/// What a reclaim attempt did
#[derive(Debug, Default)]
pub struct ReclaimReport {
    /// Port that was inspected
    pub port: u16,
    /// Listening pids other than our own
    pub found: Vec<u32>,
    /// Pids that were stopped
    pub terminated: Vec<u32>,
    /// Failures encountered along the way
    pub failures: Vec<ReclaimError>,
}

/// Stop every process listening on `port`
///
/// Waits `delay` after stopping at least one process so the OS can release
/// the socket. Never fails; problems end up in the report and the log.
pub fn reclaim_port(inspector: &dyn PortInspector, port: u16, delay: Duration) -> ReclaimReport {
    let mut report = ReclaimReport {
        port,
        ..ReclaimReport::default()
    };

    let own_pid = std::process::id();
    match inspector.listeners(port) {
        Ok(pids) => report.found = pids.into_iter().filter(|&pid| pid != own_pid).collect(),
        Err(e) => {
            warn!("Could not check port {}: {}", port, e);
            report.failures.push(e);
            return report;
        }
    }

    if report.found.is_empty() {
        debug!(port, inspector = inspector.name(), "port is free");
        return report;
    }

    info!("Port {} is already in use. Stopping existing process...", port);
    for &pid in &report.found {
        match inspector.terminate(pid) {
            Ok(()) => {
                info!("Stopped process {} on port {}", pid, port);
                report.terminated.push(pid);
            }
            Err(e) => {
                warn!("Could not stop process on port {}: {}", port, e);
                report.failures.push(e);
            }
        }
    }

    if !report.terminated.is_empty() && !delay.is_zero() {
        thread::sleep(delay);
    }
    report
}

/// Pids from `lsof -t` output: one per line, deduplicated in order
pub fn parse_lsof_pids(stdout: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for pid in stdout.lines().filter_map(|l| l.trim().parse::<u32>().ok()) {
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}

/// Arguments for `netstat`: every protocol, so IPv6 listeners show up too
pub const NETSTAT_ARGS: &[&str] = &["-ano"];

/// Drop the stderr lines lsof prints for mounts it cannot stat
///
/// A warning and its indented continuation lines are skipped. Returns what is
/// left, trimmed; empty means lsof only warned.
pub fn lsof_errors(stderr: &str) -> String {
    let mut errors = Vec::new();
    let mut in_warning = false;
    for line in stderr.lines() {
        if line.starts_with("lsof: WARNING") {
            in_warning = true;
            continue;
        }
        if in_warning && line.starts_with(char::is_whitespace) {
            continue;
        }
        in_warning = false;
        let line = line.trim();
        if !line.is_empty() {
            errors.push(line);
        }
    }
    errors.join("\n")
}

/// Pids from `netstat -ano` output listening on exactly `port`
///
/// Rows look like `TCP  0.0.0.0:8090  0.0.0.0:0  LISTENING  1234`. The local
/// address port must match exactly, so `:80` does not match `:8090`.
pub fn parse_netstat_pids(stdout: &str, port: u16) -> Vec<u32> {
    let mut pids = Vec::new();
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 || !parts[0].eq_ignore_ascii_case("tcp") || parts[3] != "LISTENING" {
            continue;
        }
        let local_port = parts[1].rsplit(':').next().and_then(|p| p.parse::<u16>().ok());
        if local_port != Some(port) {
            continue;
        }
        if let Ok(pid) = parts[4].parse::<u32>() {
            if pid != 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

/// `lsof` + `SIGKILL`
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct LsofInspector;

#[cfg(unix)]
impl PortInspector for LsofInspector {
    fn name(&self) -> &'static str {
        "lsof"
    }

    fn listeners(&self, port: u16) -> Result<Vec<u32>, ReclaimError> {
        let output = Command::new("lsof")
            .args(["-nP", "-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
            .output()
            .map_err(|e| ReclaimError::Inspect {
                port,
                reason: format!("lsof: {}", e),
            })?;

        // lsof exits 1 both when nothing matches and on real errors; only
        // treat it as a failure when it also complained on stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && stdout.trim().is_empty() {
            let reason = lsof_errors(&String::from_utf8_lossy(&output.stderr));
            if !reason.is_empty() {
                return Err(ReclaimError::Inspect { port, reason });
            }
        }
        Ok(parse_lsof_pids(&stdout))
    }

    fn terminate(&self, pid: u32) -> Result<(), ReclaimError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| ReclaimError::Terminate {
            pid,
            reason: "pid out of range".to_string(),
        })?;
        kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(|errno| ReclaimError::Terminate {
            pid,
            reason: errno.desc().to_string(),
        })
    }
}

/// `netstat -ano` + `taskkill /F`
#[derive(Debug, Clone, Copy, Default)]
pub struct NetstatInspector;

impl PortInspector for NetstatInspector {
    fn name(&self) -> &'static str {
        "netstat"
    }

    fn listeners(&self, port: u16) -> Result<Vec<u32>, ReclaimError> {
        let output = Command::new("netstat")
            .args(NETSTAT_ARGS)
            .output()
            .map_err(|e| ReclaimError::Inspect {
                port,
                reason: format!("netstat: {}", e),
            })?;
        if !output.status.success() {
            return Err(ReclaimError::Inspect {
                port,
                reason: format!("netstat exited with {}", output.status),
            });
        }
        Ok(parse_netstat_pids(&String::from_utf8_lossy(&output.stdout), port))
    }

    fn terminate(&self, pid: u32) -> Result<(), ReclaimError> {
        let output = Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .output()
            .map_err(|e| ReclaimError::Terminate {
                pid,
                reason: format!("taskkill: {}", e),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ReclaimError::Terminate {
                pid,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Fallback for targets without a known socket-table tool
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedInspector;

impl PortInspector for UnsupportedInspector {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn listeners(&self, _port: u16) -> Result<Vec<u32>, ReclaimError> {
        Err(ReclaimError::Unsupported)
    }

    fn terminate(&self, _pid: u32) -> Result<(), ReclaimError> {
        Err(ReclaimError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Inspector with canned listeners that records terminations
    #[derive(Default)]
    struct FakeInspector {
        pids: Vec<u32>,
        fail_listing: bool,
        refuse: Vec<u32>,
        terminated: Mutex<Vec<u32>>,
    }

    impl PortInspector for FakeInspector {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn listeners(&self, port: u16) -> Result<Vec<u32>, ReclaimError> {
            if self.fail_listing {
                return Err(ReclaimError::Inspect {
                    port,
                    reason: "tool missing".to_string(),
                });
            }
            Ok(self.pids.clone())
        }

        fn terminate(&self, pid: u32) -> Result<(), ReclaimError> {
            if self.refuse.contains(&pid) {
                return Err(ReclaimError::Terminate {
                    pid,
                    reason: "operation not permitted".to_string(),
                });
            }
            self.terminated.lock().unwrap().push(pid);
            Ok(())
        }
    }

    #[test]
    fn test_free_port_is_noop() {
        let inspector = FakeInspector::default();
        let start = Instant::now();
        let report = reclaim_port(&inspector, 8090, Duration::from_secs(5));

        assert!(report.found.is_empty());
        assert!(report.failures.is_empty());
        assert!(report.terminated.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_terminates_every_listener_then_waits() {
        let inspector = FakeInspector {
            pids: vec![101, 202],
            ..Default::default()
        };
        let start = Instant::now();
        let report = reclaim_port(&inspector, 8090, Duration::from_millis(50));

        assert_eq!(report.terminated, vec![101, 202]);
        assert_eq!(*inspector.terminated.lock().unwrap(), vec![101, 202]);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_never_terminates_own_process() {
        let own = std::process::id();
        let inspector = FakeInspector {
            pids: vec![own],
            ..Default::default()
        };
        let report = reclaim_port(&inspector, 8090, Duration::ZERO);

        assert!(report.found.is_empty());
        assert!(inspector.terminated.lock().unwrap().is_empty());
    }

    #[test]
    fn test_inspection_failure_is_reported_not_fatal() {
        let inspector = FakeInspector {
            pids: vec![7],
            fail_listing: true,
            ..Default::default()
        };
        let report = reclaim_port(&inspector, 8090, Duration::ZERO);

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], ReclaimError::Inspect { port: 8090, .. }));
        assert!(report.terminated.is_empty());
    }

    #[test]
    fn test_refused_termination_does_not_stop_others() {
        let inspector = FakeInspector {
            pids: vec![1, 2, 3],
            refuse: vec![2],
            ..Default::default()
        };
        let report = reclaim_port(&inspector, 8090, Duration::ZERO);

        assert_eq!(report.terminated, vec![1, 3]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], ReclaimError::Terminate { pid: 2, .. }));
    }

    #[test]
    fn test_unsupported_inspector() {
        let report = reclaim_port(&UnsupportedInspector, 8090, Duration::ZERO);
        assert!(matches!(report.failures[..], [ReclaimError::Unsupported]));
    }

    #[test]
    fn test_parse_lsof_pids() {
        assert_eq!(parse_lsof_pids("1234\n5678\n1234\n"), vec![1234, 5678]);
        assert_eq!(parse_lsof_pids(""), Vec::<u32>::new());
        assert_eq!(parse_lsof_pids("  42  \nnot-a-pid\n"), vec![42]);
    }

    #[test]
    fn test_parse_netstat_pids() {
        let out = "\
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:80             0.0.0.0:0              LISTENING       4
  TCP    0.0.0.0:8090           0.0.0.0:0              LISTENING       1234
  TCP    [::]:8090              [::]:0                 LISTENING       1234
  TCP    127.0.0.1:8090         127.0.0.1:51000        ESTABLISHED     1234
  TCP    127.0.0.1:51000        127.0.0.1:8090         ESTABLISHED     999
  TCP    0.0.0.0:18090          0.0.0.0:0              LISTENING       555
";
        assert_eq!(parse_netstat_pids(out, 8090), vec![1234]);
        assert_eq!(parse_netstat_pids(out, 80), vec![4]);
        assert!(parse_netstat_pids(out, 9999).is_empty());
    }

    #[test]
    fn test_netstat_lists_every_protocol() {
        // `-p TCP` would hide IPv6 listeners
        assert_eq!(NETSTAT_ARGS, &["-ano"]);
        assert!(!NETSTAT_ARGS.contains(&"-p"));
    }

    #[test]
    fn test_parse_netstat_ipv6_only_listener() {
        let out = "\
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1100
  TCP    [::]:135               [::]:0                 LISTENING       1100
  TCP    [::]:8090              [::]:0                 LISTENING       4321
  TCP    [::1]:8090             [::1]:50122            ESTABLISHED     4321
  UDP    0.0.0.0:8090           *:*                                    777
  UDP    [::]:8090              *:*                                    778
";
        assert_eq!(parse_netstat_pids(out, 8090), vec![4321]);
        assert_eq!(parse_netstat_pids(out, 135), vec![1100]);
    }

    #[test]
    fn test_lsof_warnings_are_not_errors() {
        let warnings = "\
lsof: WARNING: can't stat() fuse.gvfsd-fuse file system /run/user/1000/gvfs
      Output information may be incomplete.
";
        assert_eq!(lsof_errors(warnings), "");

        let only_warning = "lsof: WARNING: can't stat() fuse file system /mnt/x\n\n";
        assert_eq!(lsof_errors(only_warning), "");

        let real = "lsof: WARNING: can't stat() nfs file system /srv\nlsof: unknown option: -Z\n";
        assert_eq!(lsof_errors(real), "lsof: unknown option: -Z");
    }

    #[test]
    fn test_platform_reclaim_on_free_port() {
        // Grab an unused port, release it, then reclaim it.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let inspector = platform_inspector();
        let report = reclaim_port(inspector.as_ref(), port, Duration::ZERO);
        assert!(report.found.is_empty());
        assert!(report.terminated.is_empty());
    }
}
