//! Lifecycle controller tests against an in-memory kernel and dataplane.
//!
//! These cover the startup sequence, rollback on failure, restoration at
//! shutdown and recovery from a previous run that died without restoring.

mod common;

use std::net::Ipv4Addr;

use common::{FakeDataplane, FakeKernel, FakeLink};
use tempfile::TempDir;
use vpp_uplink_agent::lifecycle::{UplinkController, UplinkPhase};
use vpp_uplink_agent::state_store::StateStore;
use vpp_uplink_agent::uplink::RestoreStep;
use vpp_uplink_shared::errors::UplinkError;
use vpp_uplink_shared::{DriverKind, InterfaceRoute, InterfaceSpec};

const VPP_PID: u32 = 4242;

fn eth0_configured() -> FakeLink {
    FakeLink::new("eth0", 2)
        .up()
        .address("10.0.0.5/24")
        .route(InterfaceRoute::default_v4(Ipv4Addr::new(10, 0, 0, 1)))
        .route(InterfaceRoute {
            destination: "192.168.10.0".parse().unwrap(),
            prefix_len: 24,
            gateway: None,
            priority: Some(100),
        })
}

fn controller(
    kernel: &FakeKernel,
    vpp: &FakeDataplane,
    specs: Vec<InterfaceSpec>,
) -> (UplinkController<FakeKernel, FakeDataplane>, StateStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("uplink_state.json"));
    let controller = UplinkController::new(kernel.clone(), vpp.clone(), specs, store.clone());
    (controller, store, dir)
}

#[tokio::test]
async fn test_down_interface_handover_and_restore() {
    let kernel = FakeKernel::new().with_link(FakeLink::new("eth0", 2));
    let vpp = FakeDataplane::new();
    let (mut controller, store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);

    controller.start(VPP_PID).await.unwrap();

    let moved = kernel.link_in_namespace(VPP_PID, "eth0").unwrap();
    assert!(moved.attrs.promisc_on);
    assert!(kernel.link("eth0").is_none());
    assert_eq!(vpp.created(), vec!["af_packet eth0".to_string()]);
    assert_eq!(vpp.tags(), vec![(1, "eth0".to_string())]);

    let records = controller.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].driver, DriverKind::AfPacket);
    assert_eq!(records[0].sw_if_index, Some(1));
    assert_eq!(records[0].phase, UplinkPhase::DataplaneOwned);
    assert_eq!(store.load().unwrap().unwrap().vpp_pid, Some(VPP_PID));

    let reports = controller.restore_all().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_clean());
    assert!(reports[0].completed(&RestoreStep::MoveFromNamespace));

    let restored = kernel.link("eth0").unwrap();
    assert!(!restored.attrs.is_up);
    assert!(restored.addresses.is_empty());
    assert!(!kernel.called("set_link_up"));
    assert!(!kernel.called("add_address"));
    assert!(!kernel.called("add_route"));

    assert_eq!(controller.records()[0].sw_if_index, None);
    assert_eq!(controller.phase("eth0"), Some(UplinkPhase::Restored));
    assert_eq!(store.load().unwrap(), None);
}

#[tokio::test]
async fn test_restore_round_trip() {
    let original = eth0_configured();
    let kernel = FakeKernel::new().with_link(original.clone());
    let vpp = FakeDataplane::new();
    let (mut controller, _store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);

    controller.start(VPP_PID).await.unwrap();
    let reports = controller.restore_all().await;
    assert!(reports[0].is_clean(), "{}", reports[0]);

    let restored = kernel.link("eth0").unwrap();
    assert_eq!(restored.attrs.is_up, original.attrs.is_up);
    assert_eq!(restored.attrs.promisc_on, original.attrs.promisc_on);
    assert_eq!(restored.attrs.mtu, original.attrs.mtu);
    assert_eq!(restored.addresses, original.addresses);
    assert_eq!(restored.routes, original.routes);
}

#[tokio::test]
async fn test_ipv4_link_local_address_round_trips() {
    let original = eth0_configured()
        .address("169.254.10.1/16")
        .address("fe80::5054:ff:fe12:3456/64");
    let kernel = FakeKernel::new().with_link(original.clone());
    let vpp = FakeDataplane::new();
    let (mut controller, _store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);

    controller.start(VPP_PID).await.unwrap();
    let reports = controller.restore_all().await;
    assert!(reports[0].is_clean(), "{}", reports[0]);

    let restored = kernel
        .link("eth0")
        .unwrap()
        .addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>();
    assert_eq!(restored, vec!["10.0.0.5/24", "169.254.10.1/16"]);
}

#[tokio::test]
async fn test_missing_interface_is_a_lookup_error() {
    let kernel = FakeKernel::new();
    let vpp = FakeDataplane::new();
    let (mut controller, store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("doesnotexist", true)]);

    let err = controller.start(VPP_PID).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("doesnotexist"));

    assert!(kernel.mutations().is_empty());
    assert!(vpp.created().is_empty());
    assert!(controller.records().is_empty());
    assert_eq!(store.load().unwrap(), None);
}

#[tokio::test]
async fn test_index_mismatch_aborts_without_tagging() {
    let kernel = FakeKernel::new().with_link(eth0_configured());
    let vpp = FakeDataplane::new().with_next_index(3);
    let (mut controller, store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);

    let err = controller.start(VPP_PID).await.unwrap_err();
    match err {
        UplinkError::IndexMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 3);
        }
        other => panic!("expected an index mismatch, got {}", other),
    }
    assert!(vpp.tags().is_empty());

    // Rolled back
    let restored = kernel.link("eth0").unwrap();
    assert!(restored.attrs.is_up);
    assert!(!restored.attrs.promisc_on);
    assert_eq!(restored.addresses.len(), 1);
    assert_eq!(controller.phase("eth0"), Some(UplinkPhase::Restored));
    assert_eq!(controller.records()[0].sw_if_index, None);
    assert_eq!(store.load().unwrap(), None);
}

#[tokio::test]
async fn test_restore_survives_every_step_failing() {
    let kernel = FakeKernel::new().with_link(eth0_configured());
    let vpp = FakeDataplane::new();
    let (mut controller, store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);
    controller.start(VPP_PID).await.unwrap();

    kernel.fail("set_link_up");
    kernel.fail("set_promisc");
    kernel.fail("add_address");
    kernel.fail("add_route");

    let reports = controller.restore_all().await;
    assert_eq!(reports.len(), 1);
    let report = &reports[0];

    assert!(!report.is_clean());
    assert!(report.completed(&RestoreStep::MoveFromNamespace));
    assert!(report.failed(&RestoreStep::SetUp));
    assert!(report.failed(&RestoreStep::SetPromiscOff));
    // One address and two routes
    assert_eq!(report.failures().len(), 5);

    assert_eq!(controller.phase("eth0"), Some(UplinkPhase::Restored));
    assert_eq!(store.load().unwrap(), None);
}

#[tokio::test]
async fn test_failed_move_back_keeps_state_and_skips_link_steps() {
    let kernel = FakeKernel::new().with_link(eth0_configured());
    let vpp = FakeDataplane::new();
    let (mut controller, store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);
    controller.start(VPP_PID).await.unwrap();

    kernel.fail("move_link_from_namespace");
    let reports = controller.restore_all().await;
    let report = &reports[0];

    assert!(report.failed(&RestoreStep::MoveFromNamespace));
    assert!(report.failed(&RestoreStep::LookupLink));
    assert_eq!(report.failures().len(), 2);
    assert!(report.skipped().is_some());
    assert!(!kernel.called("set_link_up"));
    assert!(!kernel.called("add_address"));

    // Nothing is retried
    let moves = kernel
        .calls()
        .iter()
        .filter(|c| c.starts_with("move_link_from_namespace"))
        .count();
    assert_eq!(moves, 1);

    assert_eq!(controller.phase("eth0"), Some(UplinkPhase::Restored));
    let kept = store.load().unwrap().unwrap();
    assert_eq!(kept.vpp_pid, Some(VPP_PID));
    assert_eq!(kept.uplinks[0].spec.interface_name, "eth0");
}

#[tokio::test]
async fn test_handover_failure_rolls_back_every_uplink() {
    let kernel = FakeKernel::new()
        .with_link(eth0_configured())
        .with_link(FakeLink::new("eth1", 3).up().address("192.168.1.2/24"));
    let vpp = FakeDataplane::new().failing_create();
    let (mut controller, _store, _dir) = controller(
        &kernel,
        &vpp,
        vec![
            InterfaceSpec::new("eth0", true),
            InterfaceSpec::new("eth1", false),
        ],
    );

    let err = controller.start(VPP_PID).await.unwrap_err();
    assert!(matches!(err, UplinkError::DataplaneCreate { .. }));

    let eth0 = kernel.link("eth0").unwrap();
    assert!(eth0.attrs.is_up);
    assert_eq!(eth0.addresses.len(), 1);
    assert_eq!(eth0.routes.len(), 2);

    let eth1 = kernel.link("eth1").unwrap();
    assert!(eth1.attrs.is_up);
    assert!(!eth1.attrs.promisc_on);
    assert!(kernel.link_in_namespace(VPP_PID, "eth1").is_none());

    assert!(
        controller
            .records()
            .iter()
            .all(|r| r.phase == UplinkPhase::Restored)
    );
}

#[tokio::test]
async fn test_preconfigure_failure_restores_earlier_uplinks() {
    let kernel = FakeKernel::new().with_link(eth0_configured());
    let vpp = FakeDataplane::new();
    let (mut controller, store, _dir) = controller(
        &kernel,
        &vpp,
        vec![
            InterfaceSpec::new("eth0", true),
            InterfaceSpec::new("doesnotexist", false),
        ],
    );

    let err = controller.configure().await.unwrap_err();
    assert!(err.is_not_found());

    let eth0 = kernel.link("eth0").unwrap();
    assert!(!eth0.attrs.promisc_on);
    assert!(eth0.attrs.is_up);
    assert!(vpp.created().is_empty());
    assert_eq!(controller.phase("eth0"), Some(UplinkPhase::Restored));
    assert_eq!(controller.phase("doesnotexist"), None);
    assert_eq!(store.load().unwrap(), None);
}

#[tokio::test]
async fn test_restore_all_is_idempotent() {
    let kernel = FakeKernel::new().with_link(eth0_configured());
    let vpp = FakeDataplane::new();
    let (mut controller, _store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);

    controller.start(VPP_PID).await.unwrap();
    assert_eq!(controller.restore_all().await.len(), 1);
    assert!(controller.restore_all().await.is_empty());
}

#[tokio::test]
async fn test_recovery_after_crash() {
    let kernel = FakeKernel::new().with_link(eth0_configured());
    let vpp = FakeDataplane::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uplink_state.json");

    {
        let mut first = UplinkController::new(
            kernel.clone(),
            vpp.clone(),
            vec![InterfaceSpec::new("eth0", true)],
            StateStore::new(&path),
        );
        first.start(VPP_PID).await.unwrap();
        // Dropped without restoring, like a killed agent
    }
    assert!(kernel.link("eth0").is_none());

    let store = StateStore::new(&path);
    let persisted = store.load().unwrap().unwrap();
    assert_eq!(persisted.vpp_pid, Some(VPP_PID));
    assert_eq!(persisted.uplinks[0].driver, DriverKind::AfPacket);

    let mut second = UplinkController::new(
        kernel.clone(),
        vpp.clone(),
        vec![InterfaceSpec::new("eth0", true)],
        store.clone(),
    );
    let reports = second.recover_from_crash().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_clean(), "{}", reports[0]);

    let eth0 = kernel.link("eth0").unwrap();
    assert!(eth0.attrs.is_up);
    assert_eq!(eth0.addresses.len(), 1);
    assert_eq!(eth0.routes.len(), 2);
    assert_eq!(store.load().unwrap(), None);

    // Nothing left for a second recovery
    assert!(second.recover_from_crash().await.is_empty());
}

#[tokio::test]
async fn test_corrupt_state_file_is_discarded() {
    let kernel = FakeKernel::new().with_link(eth0_configured());
    let vpp = FakeDataplane::new();
    let (mut controller, store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);
    std::fs::write(store.path(), "{garbage").unwrap();

    assert!(controller.recover_from_crash().await.is_empty());
    assert!(!store.path().exists());
    assert!(kernel.mutations().is_empty());
}

#[tokio::test]
async fn test_physical_fleet_skips_namespace_restore() {
    let kernel = FakeKernel::new().with_link(eth0_configured().pci("0000:00:08.0", "ixgbe"));
    let vpp = FakeDataplane::new();
    let (mut controller, _store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);

    controller.start(VPP_PID).await.unwrap();
    assert!(controller.all_interfaces_physical());

    kernel.dataplane_exits(VPP_PID);
    let reports = controller.restore_all().await;
    assert!(reports[0].is_clean(), "{}", reports[0]);
    assert!(!kernel.called("move_link_from_namespace"));

    let eth0 = kernel.link("eth0").unwrap();
    assert!(eth0.attrs.is_up);
    assert_eq!(eth0.addresses.len(), 1);
}

#[tokio::test]
async fn test_physical_fleet_rollback_moves_back_from_live_dataplane() {
    let kernel = FakeKernel::new()
        .with_link(eth0_configured().pci("0000:00:08.0", "ixgbe"))
        .with_link(
            FakeLink::new("eth1", 3)
                .up()
                .address("192.168.1.2/24")
                .pci("0000:00:09.0", "ixgbe"),
        );
    // eth0 takes index 1, so the primary eth1 gets 2
    let vpp = FakeDataplane::new();
    let (mut controller, store, _dir) = controller(
        &kernel,
        &vpp,
        vec![
            InterfaceSpec::new("eth0", false),
            InterfaceSpec::new("eth1", true),
        ],
    );

    let err = controller.start(VPP_PID).await.unwrap_err();
    assert!(matches!(err, UplinkError::IndexMismatch { actual: 2, .. }));
    assert!(controller.all_interfaces_physical());

    assert!(kernel.link_in_namespace(VPP_PID, "eth0").is_none());
    assert!(kernel.link_in_namespace(VPP_PID, "eth1").is_none());

    let eth0 = kernel.link("eth0").unwrap();
    assert!(eth0.attrs.is_up);
    assert_eq!(eth0.addresses.len(), 1);
    assert_eq!(eth0.routes.len(), 2);
    let eth1 = kernel.link("eth1").unwrap();
    assert!(eth1.attrs.is_up);
    assert!(!eth1.attrs.promisc_on);

    assert!(
        controller
            .records()
            .iter()
            .all(|r| r.phase == UplinkPhase::Restored)
    );
    assert_eq!(store.load().unwrap(), None);
}

#[tokio::test]
async fn test_rollback_after_handover_moves_physical_uplinks_back() {
    let kernel = FakeKernel::new().with_link(eth0_configured().pci("0000:00:08.0", "ixgbe"));
    let vpp = FakeDataplane::new();
    let (mut controller, store, _dir) =
        controller(&kernel, &vpp, vec![InterfaceSpec::new("eth0", true)]);

    controller.start(VPP_PID).await.unwrap();
    assert!(controller.all_interfaces_physical());

    // The dataplane is still alive, so nothing returns by itself
    let reports = controller.rollback().await;
    assert!(reports[0].is_clean(), "{}", reports[0]);
    assert!(reports[0].completed(&RestoreStep::MoveFromNamespace));
    assert!(kernel.link_in_namespace(VPP_PID, "eth0").is_none());

    let eth0 = kernel.link("eth0").unwrap();
    assert!(eth0.attrs.is_up);
    assert_eq!(eth0.addresses.len(), 1);
    assert_eq!(controller.phase("eth0"), Some(UplinkPhase::Restored));
    assert_eq!(store.load().unwrap(), None);
}
