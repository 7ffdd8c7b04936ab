use tokio::process::{Child, Command};

const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub(super) fn configure(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NO_WINDOW);
}

pub(super) async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill language server: {e}");
    }
}
