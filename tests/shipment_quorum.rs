use anyhow::Result;

use provenance_core::{
    error::ProvenanceError,
    hub::ProvenanceHub,
    principal::Principal,
    shipment::ShipmentStatus,
};

const GEO: &str = "45.5231,-122.6765";

fn hub_with_shipment() -> Result<(ProvenanceHub, Principal, Principal)> {
    let mut hub = ProvenanceHub::default();
    hub.set_authority_all("ST2AUTH".into())?;
    let origin: Principal = "ST1ORIGIN".into();
    let dest: Principal = "ST2DEST".into();
    let ctx = hub.context(&origin);
    let id = hub
        .shipments
        .initiate_shipment(&ctx, &mut hub.fees, 1, dest.clone(), 1_731_328_000, GEO)?;
    assert_eq!(id, 0);
    Ok((hub, origin, dest))
}

#[test]
fn added_approver_then_second_caller_reaches_quorum() -> Result<()> {
    let (mut hub, origin, _) = hub_with_shipment()?;
    let x: Principal = "ST3X".into();
    let y: Principal = "ST3Y".into();

    hub.shipments.add_approver(&hub.context(&origin), 0, x.clone())?;
    assert!(!hub.shipments.approve_shipment(&hub.context(&x), 0)?);
    assert_eq!(
        hub.shipments.shipment(0).map(|s| s.status),
        Some(ShipmentStatus::Active)
    );
    assert!(hub.shipments.approve_shipment(&hub.context(&y), 0)?);
    assert_eq!(
        hub.shipments.shipment(0).map(|s| s.status),
        Some(ShipmentStatus::InTransit)
    );
    assert!(hub.shipments.is_approved_by(0, &x));
    assert!(hub.shipments.is_approved_by(0, &y));
    Ok(())
}

#[test]
fn quorum_fires_exactly_once() -> Result<()> {
    let (mut hub, _, _) = hub_with_shipment()?;
    let signers: Vec<Principal> = (0..4).map(|i| format!("ST9SIGNER{i}").into()).collect();

    let mut signals = Vec::new();
    for s in &signers {
        signals.push(hub.shipments.approve_shipment(&hub.context(s), 0));
    }
    assert!(matches!(signals[0], Ok(false)));
    assert!(matches!(signals[1], Ok(true)));
    assert!(matches!(signals[2], Err(ProvenanceError::InvalidState(_))));
    assert!(matches!(signals[3], Err(ProvenanceError::InvalidState(_))));
    assert_eq!(hub.shipments.approval_count(0), 2);
    Ok(())
}

#[test]
fn full_leg_delivered_via_approvals() -> Result<()> {
    let (mut hub, _, dest) = hub_with_shipment()?;
    let a: Principal = "ST3A".into();
    let b: Principal = "ST3B".into();
    hub.shipments.approve_shipment(&hub.context(&a), 0)?;
    hub.shipments.approve_shipment(&hub.context(&b), 0)?;
    hub.shipments.complete_shipment(&hub.context(&dest), 0)?;
    assert_eq!(
        hub.shipments.shipment(0).map(|s| s.status),
        Some(ShipmentStatus::Delivered)
    );
    // initiated + two approvals + completion
    assert_eq!(hub.shipments.history(0).len(), 4);
    hub.verify_history()?;
    Ok(())
}

#[test]
fn destination_may_bypass_quorum_with_direct_status() -> Result<()> {
    let (mut hub, _, dest) = hub_with_shipment()?;
    hub.shipments
        .update_shipment_status(&hub.context(&dest), 0, "in-transit", GEO)?;
    hub.shipments.complete_shipment(&hub.context(&dest), 0)?;
    let s = hub.shipments.shipment(0).expect("shipment 0");
    assert_eq!(s.status, ShipmentStatus::Delivered);
    assert_eq!(s.last_update.as_ref().map(|u| u.status), Some(ShipmentStatus::Delivered));
    Ok(())
}

#[test]
fn shipment_ids_independent_of_other_ledgers() -> Result<()> {
    let (mut hub, origin, _) = hub_with_shipment()?;
    let ctx = hub.context(&origin);
    let id = hub
        .shipments
        .initiate_shipment(&ctx, &mut hub.fees, 99, "ST3OTHER".into(), 1_731_328_100, GEO)?;
    assert_eq!(id, 1);
    assert_eq!(hub.shipments.shipment_count(), 2);
    assert_eq!(hub.batches.batch_count(), 0);
    Ok(())
}
