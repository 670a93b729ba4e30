//! UTS namespace identity.
//!
//! Sets the container's hostname and NIS domain name. Only meaningful
//! inside a UTS namespace the container owns.

use husk_common::error::{HuskError, Result};

/// Sets the hostname inside the UTS namespace.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname)
        .map_err(|e| HuskError::syscall(format!("sethostname {hostname:?}"), e))?;
    tracing::debug!(hostname, "hostname set");
    Ok(())
}

/// Sets the NIS domain name inside the UTS namespace.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if `setdomainname(2)` fails.
pub fn set_domainname(domainname: &str) -> Result<()> {
    // SAFETY: the pointer and length describe a live, initialized byte slice
    // that the kernel only reads.
    let rc = unsafe {
        libc::setdomainname(domainname.as_ptr().cast(), domainname.len())
    };
    if rc != 0 {
        return Err(HuskError::syscall(
            format!("setdomainname {domainname:?}"),
            std::io::Error::last_os_error(),
        ));
    }
    tracing::debug!(domainname, "domain name set");
    Ok(())
}
