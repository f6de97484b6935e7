use anyhow::Result;

use provenance_core::{
    batch::NewBatch,
    config::ProvenanceConfig,
    env::{CallContext, FeeJournal},
    error::{ErrorCode, InvalidField, ProvenanceError, RecordKind},
    hub::ProvenanceHub,
    principal::Principal,
    shipment::ShipmentLedger,
    transfer::TransferLedger,
};

fn kale() -> NewBatch {
    NewBatch {
        hash: "f".repeat(64),
        title: "Organic Kale Batch".into(),
        description: "Harvested in Oregon farm".into(),
        harvest_date: 1_731_328_000,
        batch_size: 1000,
        cert_body: "USDA".into(),
        geo_location: "45.5231,-122.6765".into(),
        quality_metric: 95,
    }
}

#[test]
fn second_authority_always_rejected() {
    for second in ["ST2AUTH", "ST9OTHER", ""] {
        let mut l = TransferLedger::default();
        l.set_authority("ST2AUTH".into()).unwrap();
        let err = l.set_authority(second.into()).unwrap_err();
        assert!(matches!(err, ProvenanceError::AuthorityAlreadySet));
        assert_eq!(ErrorCode::from(&err), ErrorCode::AuthorityAlreadySet);
        assert_eq!(l.authority().map(Principal::as_str), Some("ST2AUTH"));
    }
}

#[test]
fn governance_without_authority() {
    let mut hub = ProvenanceHub::default();
    assert!(matches!(hub.batches.set_fee(1), Err(ProvenanceError::AuthorityNotSet)));
    assert!(matches!(hub.shipments.set_capacity(1), Err(ProvenanceError::AuthorityNotSet)));
    assert!(matches!(hub.transfers.set_fee(1), Err(ProvenanceError::AuthorityNotSet)));
}

#[test]
fn invalid_fee_and_capacity_values() -> Result<()> {
    let mut hub = ProvenanceHub::default();
    hub.set_authority_all("ST2AUTH".into())?;
    assert!(matches!(
        hub.shipments.set_fee(-5),
        Err(ProvenanceError::InvalidInput(InvalidField::Fee))
    ));
    assert!(matches!(
        hub.transfers.set_capacity(0),
        Err(ProvenanceError::InvalidInput(InvalidField::Capacity))
    ));
    assert_eq!(hub.shipments.fee(), 200);
    assert_eq!(hub.transfers.capacity(), 5_000);
    Ok(())
}

/// A refused fee leaves every ledger exactly as it was.
#[test]
fn refused_fee_is_all_or_nothing() -> Result<()> {
    let mut hub = ProvenanceHub::default();
    hub.set_authority_all("ST2AUTH".into())?;
    hub.fees.set_refuse(true);
    let who: Principal = "ST1OWNER".into();
    let ctx = hub.context(&who);

    let err = hub
        .batches
        .register_batch(&ctx, &mut hub.fees, kale())
        .unwrap_err();
    assert!(matches!(err, ProvenanceError::FeeTransfer(_)));
    assert!(hub
        .shipments
        .initiate_shipment(&ctx, &mut hub.fees, 0, "ST2DEST".into(), 0, "g")
        .is_err());
    assert!(hub
        .transfers
        .initiate_transfer(&ctx, &mut hub.fees, 0, "ST2NEW".into(), 0, 10)
        .is_err());

    assert_eq!(hub.batches.batch_count(), 0);
    assert_eq!(hub.shipments.shipment_count(), 0);
    assert_eq!(hub.transfers.transfer_count(), 0);
    assert!(hub.transfers.escrow(0).is_none());
    assert_eq!(hub.batches.history_log().total(), 0);
    assert_eq!(hub.shipments.history_log().total(), 0);
    assert_eq!(hub.transfers.history_log().total(), 0);
    assert!(hub.fees.intents().is_empty());

    // Once the sink accepts again, the first id is still 0.
    hub.fees.set_refuse(false);
    assert_eq!(hub.batches.register_batch(&ctx, &mut hub.fees, kale())?, 0);
    Ok(())
}

#[test]
fn failed_calls_leave_records_untouched() -> Result<()> {
    let mut hub = ProvenanceHub::default();
    hub.set_authority_all("ST2AUTH".into())?;
    let owner: Principal = "ST1OWNER".into();
    let ctx = hub.context(&owner);
    hub.batches.register_batch(&ctx, &mut hub.fees, kale())?;
    let before = hub.batches.batch(0).cloned();
    let trail_before = hub.batches.history(0).len();

    assert!(hub.batches.update_batch(&ctx, 0, "ok", &"x".repeat(501)).is_err());
    assert!(hub.batches.certify_batch(&ctx, 0, "short", 10).is_err());
    let stranger: Principal = "ST4FAKE".into();
    assert!(hub
        .batches
        .deactivate_batch(&hub.context(&stranger), 0)
        .is_err());

    assert_eq!(hub.batches.batch(0).cloned(), before);
    assert_eq!(hub.batches.history(0).len(), trail_before);
    Ok(())
}

#[test]
fn capacity_ceiling_reported_per_ledger() -> Result<()> {
    let mut cfg = ProvenanceConfig::default();
    cfg.shipments.capacity = 1;
    let mut hub = ProvenanceHub::new(&cfg);
    hub.set_authority_all("ST2AUTH".into())?;
    let origin: Principal = "ST1ORIGIN".into();
    let ctx = hub.context(&origin);
    hub.shipments
        .initiate_shipment(&ctx, &mut hub.fees, 0, "ST2DEST".into(), 0, "g")?;
    let err = hub
        .shipments
        .initiate_shipment(&ctx, &mut hub.fees, 0, "ST2DEST".into(), 0, "g")
        .unwrap_err();
    assert!(matches!(
        err,
        ProvenanceError::CapacityExceeded {
            kind: RecordKind::Shipment,
            capacity: 1
        }
    ));
    assert_eq!(err.to_string(), "shipment capacity of 1 exceeded");

    // Capacity is checked before anything else, even malformed input.
    let bad: Principal = "INVALID".into();
    assert!(matches!(
        hub.shipments.initiate_shipment(
            &hub.context(&bad),
            &mut hub.fees,
            0,
            "INVALID".into(),
            0,
            ""
        ),
        Err(ProvenanceError::CapacityExceeded { .. })
    ));
    Ok(())
}

#[test]
fn not_found_names_the_record() {
    let mut l = ShipmentLedger::default();
    let who: Principal = "ST1X".into();
    let err = l
        .complete_shipment(&CallContext::new(&who, 0), 42)
        .unwrap_err();
    assert_eq!(err.to_string(), "shipment 42 not found");
    assert_eq!(ErrorCode::from(&err) as i32, 4);
}

#[test]
fn validation_precedes_authority_check() {
    let mut l = TransferLedger::default();
    let mut fees = FeeJournal::new();
    let who: Principal = "ST1OWNER".into();
    let err = l
        .initiate_transfer(&CallContext::new(&who, 0), &mut fees, 0, "ST2NEW".into(), 0, -1)
        .unwrap_err();
    assert!(matches!(
        err,
        ProvenanceError::InvalidInput(InvalidField::EscrowAmount)
    ));
}

#[test]
fn clock_never_rewinds() -> Result<()> {
    let mut hub = ProvenanceHub::default();
    hub.advance_to(10)?;
    assert!(matches!(
        hub.advance_to(9),
        Err(ProvenanceError::InvalidInput(InvalidField::Timestamp))
    ));
    assert_eq!(hub.now(), 10);
    Ok(())
}
