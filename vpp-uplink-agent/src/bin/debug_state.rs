//! Dumps the CNI per-pod state store.

use clap::{Arg, Command};
use std::path::PathBuf;
use tracing::{error, info};

use vpp_uplink_shared::pod_state::{default_state_file, load_pod_states};

fn build_cli(default_path: String) -> Command {
    Command::new("debug-state")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Print the pod interface records persisted by the CNI server")
        .arg(
            Arg::new("file")
                .short('f')
                .value_name("PATH")
                .help("Pod state path")
                .default_value(default_path),
        )
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .event_format(
            tracing_subscriber::fmt::format()
                .with_target(false)
                .compact(),
        )
        .init();

    let matches = build_cli(default_state_file().display().to_string()).get_matches();
    let path = matches
        .get_one::<String>("file")
        .map(PathBuf::from)
        .unwrap_or_else(default_state_file);

    let pods = match load_pod_states(&path) {
        Ok(pods) => pods,
        Err(e) => {
            error!("Loading pod state failed: {:#}", e);
            return;
        }
    };

    for (i, pod) in pods.iter().enumerate() {
        info!("-------- Elem {}--------\n{}", i, pod.full_string());
    }
    info!("{} Elts", pods.len());
}
