//! Host architecture detection

use tokio::process::Command;
use tracing::debug;

/// CPU type of the build host, as reported by `uname -m`.
///
/// Falls back to the architecture this binary was compiled for when
/// `uname` is unavailable.
pub async fn detect_host_arch() -> String {
    let output = Command::new("uname").arg("-m").output().await;

    match output {
        Ok(output) if output.status.success() => {
            let machine = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !machine.is_empty() {
                debug!("Detected host architecture: {}", machine);
                return machine;
            }
        }
        Ok(output) => {
            debug!("uname -m exited with {}", output.status);
        }
        Err(e) => {
            debug!("Failed to run uname -m: {}", e);
        }
    }

    std::env::consts::ARCH.to_string()
}
