mod common;

use common::{
    completion, compact_record, full_record, locator_record, unsupported, ScriptedTransport, SdrFixture, RESERVATION,
};
use dcm_platform_collector::ipmi::catalog::HealthDomain;
use dcm_platform_collector::ipmi::health::{component_health, Severity};
use dcm_platform_collector::ipmi::sdr::{probe_repository, scan_repository, SdrRepository};
use dcm_platform_collector::Error;

fn serve(fixture: SdrFixture) -> ScriptedTransport {
    ScriptedTransport::new(move |req, _host| match fixture.answer(req) {
        Some(resp) => Ok(resp),
        None => unsupported(),
    })
}

/// (record id, offset, count) of every Get SDR call.
fn get_sdr_calls(transport: &ScriptedTransport, netfn: u8, cmd: u8) -> Vec<(u16, u8, u8)> {
    transport
        .calls_to(&[netfn, cmd])
        .iter()
        .map(|r| (u16::from_le_bytes([r[4], r[5]]), r[6], r[7]))
        .collect()
}

#[tokio::test]
async fn keeps_only_sensor_records() {
    let transport = serve(SdrFixture::chain(vec![
        full_record(1, 0x30, 0x01, 0x01),
        locator_record(2),
        compact_record(3, 0x40, 0x04, 0x07),
    ]));

    let records = scan_repository(&transport, "bmc", SdrRepository::Storage).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!((records[0].sensor_number, records[0].sensor_type, records[0].event_reading_type), (0x30, 0x01, 0x01));
    assert_eq!((records[1].sensor_number, records[1].sensor_type, records[1].event_reading_type), (0x40, 0x04, 0x07));
    assert_eq!(records[1].header.record_id, 3);

    let headers: Vec<_> = get_sdr_calls(&transport, 0x0a, 0x23)
        .into_iter()
        .filter(|&(_, offset, count)| offset == 0 && count == 5)
        .collect();
    assert_eq!(headers, vec![(0, 0, 5), (2, 0, 5), (3, 0, 5)]);
}

#[tokio::test]
async fn reservation_is_taken_once_and_reused() {
    let transport = serve(SdrFixture::chain(vec![
        full_record(1, 0x30, 0x01, 0x01),
        full_record(2, 0x31, 0x02, 0x01),
    ]));

    scan_repository(&transport, "bmc", SdrRepository::Storage).await.unwrap();

    assert_eq!(transport.calls_to(&[0x0a, 0x20]).len(), 1);
    assert_eq!(transport.calls_to(&[0x0a, 0x22]).len(), 1);
    let reads = transport.calls_to(&[0x0a, 0x23]);
    assert!(!reads.is_empty());
    assert!(reads.iter().all(|r| r[2..4] == RESERVATION));
}

#[tokio::test]
async fn pages_follow_allocation_unit() {
    let mut fixture = SdrFixture::chain(vec![full_record(1, 0x30, 0x01, 0x01)]);
    fixture.allocation_unit = Some(8);
    let transport = serve(fixture);

    scan_repository(&transport, "bmc", SdrRepository::Storage).await.unwrap();

    // header with the default page, then the 48 byte record in 8 byte pages
    assert_eq!(
        get_sdr_calls(&transport, 0x0a, 0x23),
        vec![(0, 0, 5), (1, 0, 8), (1, 8, 8), (1, 16, 8), (1, 24, 8), (1, 32, 8), (1, 40, 8)]
    );
}

#[tokio::test]
async fn default_page_without_allocation_info() {
    let transport = serve(SdrFixture::chain(vec![compact_record(7, 0x40, 0x04, 0x01)]));

    scan_repository(&transport, "bmc", SdrRepository::Storage).await.unwrap();

    assert_eq!(get_sdr_calls(&transport, 0x0a, 0x23), vec![(0, 0, 5), (7, 0, 16), (7, 16, 16)]);
}

#[tokio::test]
async fn device_repository_uses_sensor_commands() {
    let mut fixture = SdrFixture::chain(vec![full_record(1, 0x30, 0x01, 0x01)]);
    fixture.device_id = vec![0x20, 0x81, 0x01, 0x25, 0x02, 0x01];
    let transport = serve(fixture);

    let repository = probe_repository(&transport, "bmc").await.unwrap();
    assert_eq!(repository, SdrRepository::Device);

    let records = scan_repository(&transport, "bmc", repository).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(transport.calls_to(&[0x0a]).is_empty());
    assert_eq!(transport.calls_to(&[0x04, 0x22]).len(), 1);
    assert_eq!(get_sdr_calls(&transport, 0x04, 0x21).len(), 4);
}

#[tokio::test]
async fn ambiguous_device_id_is_rejected() {
    let mut fixture = SdrFixture::chain(Vec::new());
    fixture.device_id = vec![0x20, 0x81, 0x01, 0x25, 0x02, 0x00];
    let transport = serve(fixture);

    let err = probe_repository(&transport, "bmc").await.unwrap_err();
    assert_eq!(err.to_string(), "protocol error: Fail to find a valuable SDR");
}

#[tokio::test]
async fn linked_list_cycle_stops_the_scan() {
    let mut fixture = SdrFixture::chain(vec![
        full_record(1, 0x30, 0x01, 0x01),
        full_record(2, 0x31, 0x01, 0x01),
        full_record(3, 0x32, 0x01, 0x01),
    ]);
    fixture.records[2].1 = 2;
    let transport = serve(fixture);

    let partial = scan_repository(&transport, "bmc", SdrRepository::Storage).await.unwrap_err();
    assert_eq!(partial.records.len(), 3);
    assert!(matches!(partial.source, Error::Protocol(_)));
}

#[tokio::test]
async fn failed_read_returns_accepted_records() {
    let fixture = SdrFixture::chain(vec![
        full_record(1, 0x30, 0x01, 0x01),
        full_record(2, 0x31, 0x01, 0x01),
        full_record(3, 0x32, 0x01, 0x01),
    ]);
    let transport = ScriptedTransport::new(move |req, _host| {
        // reservation lost while reading record 2
        if req.data[..2] == [0x0a, 0x23] && req.data[4] == 2 {
            return Ok(completion(0xC5));
        }
        Ok(fixture.answer(req).unwrap_or_else(|| completion(0xC1)))
    });

    let partial = scan_repository(&transport, "bmc", SdrRepository::Storage).await.unwrap_err();
    assert_eq!(partial.records.len(), 1);
    assert_eq!(partial.records[0].sensor_number, 0x30);
    assert!(matches!(partial.source, Error::CompletionCode { completion_code: 0xC5 }));
}

#[tokio::test]
async fn record_reporting_another_id_is_still_kept() {
    let fixture = SdrFixture::chain(vec![
        full_record(1, 0x30, 0x01, 0x01),
        full_record(2, 0x31, 0x01, 0x01),
        full_record(3, 0x32, 0x01, 0x01),
    ]);
    let transport = ScriptedTransport::new(move |req, _host| {
        let mut resp = fixture.answer(req).unwrap_or_else(|| completion(0xC1));
        // record 2 claims to be record 7 in its own header
        if req.data[..2] == [0x0a, 0x23] && req.data[4] == 2 && req.data[6] == 0 && resp.data.len() > 3 {
            resp.data[3] = 0x07;
        }
        Ok(resp)
    });

    let records = scan_repository(&transport, "bmc", SdrRepository::Storage).await.unwrap();
    let sensors: Vec<u8> = records.iter().map(|r| r.sensor_number).collect();
    assert_eq!(sensors, vec![0x30, 0x31, 0x32]);
    assert_eq!(records[1].header.record_id, 7);

    // the body is fetched by the id the chain linked to
    let bodies: Vec<u16> = get_sdr_calls(&transport, 0x0a, 0x23)
        .into_iter()
        .filter(|&(_, _, count)| count != 5)
        .map(|(id, _, _)| id)
        .collect();
    assert!(!bodies.contains(&7));
    assert!(bodies.contains(&2));
}

#[tokio::test]
async fn longest_record_is_read_up_to_the_last_offset() {
    let mut record = full_record(1, 0x30, 0x01, 0x01);
    record[4] = 0xff;
    record.resize(5 + 0xff, 0x00);
    let transport = serve(SdrFixture::chain(vec![record]));

    let records = scan_repository(&transport, "bmc", SdrRepository::Storage).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sensor_number, 0x30);

    let pages = get_sdr_calls(&transport, 0x0a, 0x23);
    assert_eq!(pages.len(), 1 + 16);
    assert_eq!(pages.last(), Some(&(1, 240, 15)));
}

fn health_fixture() -> SdrFixture {
    SdrFixture::chain(vec![
        full_record(1, 0x30, 0x01, 0x01),
        full_record(2, 0x31, 0x04, 0x01),
        compact_record(3, 0x40, 0x07, 0x6f),
        full_record(4, 0x50, 0x02, 0x01),
        locator_record(5),
    ])
    // inlet temperature above upper critical
    .reading(0x30, &[0x2e, 0x40, 0x10])
    .reading(0x31, &[0x20, 0xc0, 0x00])
    // processor IERR asserted
    .reading(0x40, &[0x00, 0x40, 0x01, 0x80])
    // voltage reading unavailable
    .reading(0x50, &[0x00, 0x60, 0x3f])
}

#[tokio::test]
async fn component_health_classifies_live_sensors() {
    let transport = serve(health_fixture());

    let health = component_health(&transport, "bmc").await.unwrap();
    assert_eq!(health.get(HealthDomain::Temperature), Some(Severity::Critical));
    assert_eq!(health.get(HealthDomain::Fan), Some(Severity::Ok));
    assert_eq!(health.get(HealthDomain::Processor), Some(Severity::Unknown));
    assert_eq!(health.get(HealthDomain::Voltage), None);
    assert_eq!(health.domains.len(), 3);

    let metrics = health.to_metrics();
    assert_eq!(metrics["health/temperature"], "CRITICAL");
    assert_eq!(metrics["health/processor"], "SEV_UNKNOWN");

    let readings: Vec<u8> = transport.calls_to(&[0x04, 0x2d]).iter().map(|r| r[2]).collect();
    assert_eq!(readings, vec![0x30, 0x31, 0x40, 0x50]);
}

#[tokio::test]
async fn component_health_uses_partial_scan() {
    let fixture = health_fixture();
    let transport = ScriptedTransport::new(move |req, _host| {
        if req.data[..2] == [0x0a, 0x23] && req.data[4] == 3 {
            return Ok(completion(0xC5));
        }
        Ok(fixture.answer(req).unwrap_or_else(|| completion(0xC1)))
    });

    let health = component_health(&transport, "bmc").await.unwrap();
    assert_eq!(health.get(HealthDomain::Temperature), Some(Severity::Critical));
    assert_eq!(health.get(HealthDomain::Fan), Some(Severity::Ok));
    assert_eq!(health.get(HealthDomain::Processor), None);
}
