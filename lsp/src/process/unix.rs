use tokio::process::{Child, Command};

/// Own process group, so a Ctrl-C aimed at the editor's terminal does not
/// reach the server, and so helpers it forks can be killed with it.
pub(super) fn configure(cmd: &mut Command) {
    cmd.process_group(0);
}

pub(super) async fn terminate(child: &mut Child) {
    if let Some(pgid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: the group was created for this child and the child is not yet reaped.
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!("Failed to kill language server group: {err}");
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::trace!("Language server already gone: {e}");
    }
}
