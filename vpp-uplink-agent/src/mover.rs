//! Namespace mover.
//!
//! Relocates uplinks between the agent's namespace and the dataplane
//! namespace. Both directions accept a link that already sits on the
//! destination side: the dataplane may have been restarted, or may have
//! handed physical links back to the root namespace when it exited.

use tracing::{info, warn};

use vpp_uplink_shared::errors::{UplinkError, UplinkResult};

use crate::kernel::Kernel;

fn as_move_error(interface: &str, err: UplinkError) -> UplinkError {
    match err {
        UplinkError::InterfaceNotFound { .. } | UplinkError::Privilege { .. } => err,
        UplinkError::NamespaceMove { .. } => err,
        other => UplinkError::NamespaceMove {
            interface: interface.to_string(),
            message: other.to_string(),
        },
    }
}

/// Moves `interface_name` into the network namespace of `vpp_pid`.
pub async fn move_to_namespace<K: Kernel>(
    kernel: &K,
    interface_name: &str,
    vpp_pid: u32,
) -> UplinkResult<()> {
    info!("Moving {} to dataplane namespace (pid {})", interface_name, vpp_pid);

    match kernel.move_link_to_namespace(interface_name, vpp_pid).await {
        Ok(()) => Ok(()),
        Err(err) => {
            if kernel
                .link_exists_in_namespace(interface_name, vpp_pid)
                .await
                .unwrap_or(false)
            {
                warn!(
                    "{} is already in the dataplane namespace, not moving it ({})",
                    interface_name, err
                );
                return Ok(());
            }
            Err(as_move_error(interface_name, err))
        }
    }
}

/// Moves `interface_name` from the network namespace of `vpp_pid` back into
/// the agent's namespace.
pub async fn move_from_namespace<K: Kernel>(
    kernel: &K,
    interface_name: &str,
    vpp_pid: u32,
) -> UplinkResult<()> {
    info!("Moving {} back from dataplane namespace (pid {})", interface_name, vpp_pid);

    match kernel.move_link_from_namespace(interface_name, vpp_pid).await {
        Ok(()) => Ok(()),
        Err(err) => {
            if kernel.link_by_name(interface_name).await.is_ok() {
                warn!(
                    "{} is already back in the root namespace ({})",
                    interface_name, err
                );
                return Ok(());
            }
            Err(as_move_error(interface_name, err))
        }
    }
}
