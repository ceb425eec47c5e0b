//! Ephemeral in-memory files for passing secrets to child processes
//!
//! Credential material for SSL-secured database connections must reach the
//! external control tools without ever touching persistent storage. Each
//! [`MemFile`] wraps an anonymous memory-backed descriptor (`memfd_create`)
//! holding the bytes; the command runner remaps it into the child's
//! descriptor table and the child reads it back through
//! `/proc/self/fd/<n>`. The descriptor is closed when the `MemFile` is
//! dropped, on every exit path of the invocation that staged it.

use std::ffi::CString;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use crate::error::Result;

/// An anonymous, unlinked file holding secret bytes for a single command
/// invocation.
#[derive(Debug)]
pub struct MemFile {
    file: File,
}

impl MemFile {
    /// Creates a new in-memory file containing `contents`, rewound to the
    /// start so a child process can read it from the beginning.
    ///
    /// Kernels without `memfd_create` get an unlinked temporary file
    /// instead; it carries 0600 permissions and no name on disk, which
    /// keeps the same acquire/release contract.
    pub fn new(label: &str, contents: &[u8]) -> Result<MemFile> {
        let mut file = match Self::anonymous(label) {
            Ok(file) => file,
            Err(err) if err.raw_os_error() == Some(libc::ENOSYS) => tempfile::tempfile()?,
            Err(err) => return Err(err.into()),
        };

        file.write_all(contents)?;
        file.seek(SeekFrom::Start(0))?;

        Ok(MemFile { file })
    }

    fn anonymous(label: &str) -> std::io::Result<File> {
        let name = CString::new(label)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;

        // Close-on-exec is safe here: the runner dup2()s the descriptor to
        // its fixed child-side number, which clears the flag on the copy.
        let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(unsafe { File::from_raw_fd(fd) })
    }
}

impl AsRawFd for MemFile {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
