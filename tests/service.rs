//! Tokio-hosted engines exchanging traffic.

#![cfg(feature = "runtime")]

use std::time::Duration;

use bytes::Bytes;
use copro_link::prelude::*;

fn shared_pair() -> (SharedLink<MemoryDriver>, SharedLink<MemoryDriver>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let ((host, host_ctl), (device, device_ctl)) = MemoryDriver::pair();
    let config = LinkConfig::new().with_modulus(SequenceModulus::Eight);
    let host = SharedLink::new(Link::new(host, config.clone()).unwrap());
    let device = SharedLink::new(Link::new(device, config).unwrap());
    host_ctl.attach_signals(host.signals());
    device_ctl.attach_signals(device.signals());
    (host, device)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_writers_and_reader() {
    let (host, device) = shared_pair();
    let tx = host.open_service_endpoint(10, EndpointFlags::NONE, 4).unwrap();
    let rx = device.open_service_endpoint(10, EndpointFlags::NONE, 4).unwrap();
    let host_service = LinkService::spawn(host.clone());
    let device_service = LinkService::spawn(device.clone());

    let writer = {
        let host = host.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            for i in 0..40u8 {
                host.write(&tx, vec![i], WriteFlags::NONE).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut received: Vec<Bytes> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while received.len() < 40 && tokio::time::Instant::now() < deadline {
        match device.read(&rx) {
            Ok(payload) => received.push(payload),
            Err(err) if err.is_retryable() => tokio::time::sleep(Duration::from_millis(1)).await,
            Err(err) => panic!("read failed: {err}"),
        }
    }
    writer.await.unwrap();

    let order: Vec<u8> = received.iter().map(|payload| payload[0]).collect();
    assert_eq!(order, (0..40).collect::<Vec<u8>>());

    host_service.shutdown().await;
    device_service.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_service() {
    let (host, _device) = shared_pair();
    let service = LinkService::spawn(host.clone());
    service.shutdown().await;

    let handle = host.open_service_endpoint(1, EndpointFlags::NONE, 1).unwrap();
    host.write(&handle, "queued", WriteFlags::NONE).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(host.with(|link| link.transmit_queue_len()), 1);
}
