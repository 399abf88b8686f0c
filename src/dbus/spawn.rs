//! Spawning helper processes with a reduced privilege set.
//!
//! The child is restricted between fork and exec: capabilities are cleared,
//! the real user is restored, `no_new_privs` is set, an optional precompiled
//! seccomp filter is loaded and every descriptor except stdio and the
//! explicitly retained ones is marked close-on-exec.
//!
//! Everything the child needs is prepared in the parent, so the `pre_exec`
//! hook itself does not allocate.

use std::fs;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::unistd::{geteuid, setresgid, setresuid, Gid, Uid};
use tracing::debug;

use super::error::ProxyError;

/// Size of one `struct sock_filter` instruction.
const SOCK_FILTER_SIZE: usize = std::mem::size_of::<libc::sock_filter>();

/// Kernel limit on classic BPF program length.
const BPF_MAXINSNS: usize = 4096;

/// `CLOSE_RANGE_CLOEXEC` from `linux/close_range.h`.
const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;

/// Fallback upper bound when `close_range` is unavailable.
const MAX_FD_FALLBACK: RawFd = 4096;

/// Privilege profile applied to a spawned child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeProfile {
    /// Real uid to run as.
    pub uid: u32,
    /// Real gid to run as.
    pub gid: u32,
    /// Reset real, effective and saved ids to `uid`/`gid`.
    pub drop_to_user: bool,
    /// Set `PR_SET_NO_NEW_PRIVS`.
    pub no_new_privs: bool,
    /// Clear ambient capabilities and, when root, the bounding set.
    pub clear_capabilities: bool,
    /// Precompiled seccomp BPF program to load before exec.
    pub seccomp_filter: Option<PathBuf>,
}

impl PrivilegeProfile {
    /// Fully restricted profile for the invoking user.
    pub fn restricted(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            drop_to_user: true,
            no_new_privs: true,
            clear_capabilities: true,
            seccomp_filter: None,
        }
    }

    /// Add a seccomp filter file.
    pub fn with_seccomp(mut self, filter: Option<PathBuf>) -> Self {
        self.seccomp_filter = filter;
        self
    }
}

/// Load a precompiled seccomp filter: a raw array of `struct sock_filter`.
pub fn load_seccomp_filter(path: &Path) -> Result<Vec<libc::sock_filter>, ProxyError> {
    let bytes = fs::read(path).map_err(|e| ProxyError::Seccomp {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_seccomp_filter(&bytes).map_err(|message| ProxyError::Seccomp {
        path: path.to_path_buf(),
        message,
    })
}

fn parse_seccomp_filter(bytes: &[u8]) -> Result<Vec<libc::sock_filter>, String> {
    if bytes.is_empty() || bytes.len() % SOCK_FILTER_SIZE != 0 {
        return Err(format!("invalid filter size {} bytes", bytes.len()));
    }
    let count = bytes.len() / SOCK_FILTER_SIZE;
    if count > BPF_MAXINSNS {
        return Err(format!("filter has {} instructions (max {})", count, BPF_MAXINSNS));
    }

    Ok(bytes
        .chunks_exact(SOCK_FILTER_SIZE)
        .map(|insn| libc::sock_filter {
            code: u16::from_ne_bytes([insn[0], insn[1]]),
            jt: insn[2],
            jf: insn[3],
            k: u32::from_ne_bytes([insn[4], insn[5], insn[6], insn[7]]),
        })
        .collect())
}

/// Everything the child needs, prepared before fork.
struct ChildSetup {
    uid: Uid,
    gid: Gid,
    drop_to_user: bool,
    no_new_privs: bool,
    clear_capabilities: bool,
    last_cap: libc::c_ulong,
    filter: Option<Vec<libc::sock_filter>>,
    keep_fds: Vec<RawFd>,
}

/// Build a command for `binary` that restricts itself by `profile` before
/// exec.
///
/// Only stdio and `keep_fds` survive the exec.
pub fn restricted_command(
    binary: &Path,
    args: &[String],
    profile: &PrivilegeProfile,
    keep_fds: &[RawFd],
) -> Result<Command, ProxyError> {
    let filter = match &profile.seccomp_filter {
        Some(path) => Some(load_seccomp_filter(path)?),
        None => None,
    };

    let setup = ChildSetup {
        uid: Uid::from_raw(profile.uid),
        gid: Gid::from_raw(profile.gid),
        drop_to_user: profile.drop_to_user,
        no_new_privs: profile.no_new_privs || filter.is_some(),
        clear_capabilities: profile.clear_capabilities,
        last_cap: last_capability(),
        filter,
        keep_fds: keep_fds.to_vec(),
    };

    debug!(
        "Restricting {:?} {:?} (uid {}, keep fds {:?}, seccomp {})",
        binary,
        args,
        profile.uid,
        keep_fds,
        setup.filter.is_some()
    );

    let mut cmd = Command::new(binary);
    cmd.args(args);

    // SAFETY: restrict_child only issues raw syscalls on data prepared above
    // and does not allocate.
    unsafe {
        cmd.pre_exec(move || restrict_child(&setup));
    }
    Ok(cmd)
}

/// Spawn `binary` restricted by `profile`, with stdin from `/dev/null`.
pub fn spawn_restricted(
    binary: &Path,
    args: &[String],
    profile: &PrivilegeProfile,
    keep_fds: &[RawFd],
) -> Result<Child, ProxyError> {
    restricted_command(binary, args, profile, keep_fds)?
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| ProxyError::Spawn {
            binary: binary.to_path_buf(),
            source: e,
        })
}

fn last_capability() -> libc::c_ulong {
    fs::read_to_string("/proc/sys/kernel/cap_last_cap")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(40)
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn restrict_child(setup: &ChildSetup) -> io::Result<()> {
    if setup.clear_capabilities {
        // SAFETY: prctl with integer arguments only.
        unsafe {
            libc::prctl(
                libc::PR_CAP_AMBIENT,
                libc::PR_CAP_AMBIENT_CLEAR_ALL as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            );
        }
        if geteuid().is_root() {
            for cap in 0..=setup.last_cap {
                // SAFETY: prctl with integer arguments only.
                let rc = unsafe {
                    libc::prctl(
                        libc::PR_CAPBSET_DROP,
                        cap,
                        0 as libc::c_ulong,
                        0 as libc::c_ulong,
                        0 as libc::c_ulong,
                    )
                };
                if rc == -1 {
                    let err = io::Error::last_os_error();
                    match err.raw_os_error() {
                        // Past the last known capability.
                        Some(libc::EINVAL) => break,
                        // No CAP_SETPCAP: the bounding set cannot shrink.
                        Some(libc::EPERM) => break,
                        _ => return Err(err),
                    }
                }
            }
        }
    }

    if setup.drop_to_user {
        if geteuid().is_root() {
            // SAFETY: an empty group list needs no buffer.
            if unsafe { libc::setgroups(0, std::ptr::null()) } == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        setresgid(setup.gid, setup.gid, setup.gid).map_err(nix_to_io)?;
        setresuid(setup.uid, setup.uid, setup.uid).map_err(nix_to_io)?;
    }

    if setup.no_new_privs {
        nix::sys::prctl::set_no_new_privs().map_err(nix_to_io)?;
    }

    restrict_descriptors(&setup.keep_fds)?;

    // Last, so the filter does not have to allow the calls above.
    if let Some(filter) = &setup.filter {
        let prog = libc::sock_fprog {
            len: filter.len() as libc::c_ushort,
            filter: filter.as_ptr() as *mut libc::sock_filter,
        };
        // SAFETY: prog points at a live, correctly sized instruction array.
        let rc = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER as libc::c_ulong,
                &prog as *const libc::sock_fprog as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn restrict_descriptors(keep: &[RawFd]) -> io::Result<()> {
    // SAFETY: close_range with a flag only changes descriptor flags.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            3 as libc::c_uint,
            libc::c_uint::MAX,
            CLOSE_RANGE_CLOEXEC,
        )
    };
    if rc == -1 {
        for fd in 3..MAX_FD_FALLBACK {
            // SAFETY: fcntl on a possibly closed fd just returns EBADF.
            unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
    }

    for &fd in keep {
        // SAFETY: clears FD_CLOEXEC on a descriptor owned by the parent.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, 0) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_restricted_profile() {
        let profile = PrivilegeProfile::restricted(1000, 1000);
        assert!(profile.drop_to_user);
        assert!(profile.no_new_privs);
        assert!(profile.clear_capabilities);
        assert!(profile.seccomp_filter.is_none());
    }

    #[test]
    fn test_parse_seccomp_filter() {
        // BPF_RET | BPF_K, SECCOMP_RET_ALLOW
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x06u16.to_ne_bytes());
        bytes.push(0);
        bytes.push(0);
        bytes.extend_from_slice(&0x7fff_0000u32.to_ne_bytes());

        let filter = parse_seccomp_filter(&bytes).unwrap();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter[0].code, 0x06);
        assert_eq!(filter[0].k, 0x7fff_0000);
    }

    #[test]
    fn test_parse_seccomp_filter_rejects_bad_size() {
        assert!(parse_seccomp_filter(&[]).is_err());
        assert!(parse_seccomp_filter(&[0u8; 7]).is_err());
        assert!(parse_seccomp_filter(&vec![0u8; (BPF_MAXINSNS + 1) * SOCK_FILTER_SIZE]).is_err());
    }

    #[test]
    fn test_load_seccomp_filter_missing_file() {
        let err = load_seccomp_filter(Path::new("/nonexistent/filter")).unwrap_err();
        assert!(matches!(err, ProxyError::Seccomp { .. }));
    }

    #[test]
    fn test_spawn_keeps_only_requested_fds() {
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        let profile = PrivilegeProfile::restricted(uid, gid);

        let dir = tempfile::tempdir().unwrap();
        let kept = std::fs::File::create(dir.path().join("kept")).unwrap();
        let dropped = std::fs::File::create(dir.path().join("dropped")).unwrap();
        let kept_fd = std::os::fd::AsRawFd::as_raw_fd(&kept);
        let dropped_fd = std::os::fd::AsRawFd::as_raw_fd(&dropped);

        // Clear CLOEXEC on the dropped fd so only restrict_descriptors can close it.
        unsafe {
            libc::fcntl(dropped_fd, libc::F_SETFD, 0);
        }

        let script = format!(
            "[ -e /proc/self/fd/{k} ] && echo kept; [ -e /proc/self/fd/{d} ] && echo leaked; exit 0",
            k = kept_fd,
            d = dropped_fd
        );
        let out_path = dir.path().join("out");
        let mut child = spawn_restricted(
            Path::new("/bin/sh"),
            &[
                "-c".to_string(),
                format!("{{ {}; }} > {}", script, out_path.display()),
            ],
            &profile,
            &[kept_fd],
        )
        .unwrap();
        assert!(child.wait().unwrap().success());

        let out = std::fs::read_to_string(&out_path).unwrap();
        assert!(out.contains("kept"));
        assert!(!out.contains("leaked"));

        let mut kept = kept;
        kept.write_all(b"still usable").unwrap();
    }
}
