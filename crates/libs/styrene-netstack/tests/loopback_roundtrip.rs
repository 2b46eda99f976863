mod common;

use std::sync::Arc;

use common::{ignore, setup, wait_until, WAIT};
use netstack::driver::loopback::{self, LOOPBACK_MTU};
use netstack::{NetError, NetStack, StackConfig, NET_PROTOCOL_TYPE_ARP, NET_PROTOCOL_TYPE_IP};

#[test]
fn hello_reaches_the_ip_queue() {
    setup();
    let mut stack = NetStack::new(StackConfig::default()).expect("init");
    stack.register_protocol(NET_PROTOCOL_TYPE_IP, ignore).expect("register ip");
    let dev = loopback::init(&mut stack).expect("loopback");
    let running = stack.run().expect("run");

    running.output(&dev, NET_PROTOCOL_TYPE_IP, b"hello", None).expect("output");

    let ip = running.protocol(NET_PROTOCOL_TYPE_IP).expect("ip registration");
    assert!(wait_until(WAIT, || ip.len() == 1), "frame never delivered");
    let entry = ip.pop().expect("entry");
    assert_eq!(entry.len(), 5);
    assert_eq!(entry.data(), b"hello");
    assert!(Arc::ptr_eq(entry.dev(), &dev));
    assert!(ip.is_empty());
}

#[test]
fn frames_arrive_once_in_order_with_identical_bytes() {
    setup();
    let mut stack = NetStack::new(StackConfig::default()).expect("init");
    let ip = stack.register_protocol(NET_PROTOCOL_TYPE_IP, ignore).expect("register ip");
    let arp = stack.register_protocol(NET_PROTOCOL_TYPE_ARP, ignore).expect("register arp");
    let dev = loopback::init(&mut stack).expect("loopback");
    let running = stack.run().expect("run");

    let frames: Vec<(u16, Vec<u8>)> = (0u16..200)
        .map(|seq| {
            let ty = if seq % 3 == 0 { NET_PROTOCOL_TYPE_ARP } else { NET_PROTOCOL_TYPE_IP };
            let len = usize::from(seq % 64) + 1;
            (ty, (0..len).map(|i| (seq as usize + i) as u8).collect())
        })
        .collect();

    for (ty, data) in &frames {
        // The dispatch thread drains concurrently; back off while the queue is full.
        loop {
            match running.output(&dev, *ty, data, None) {
                Ok(()) => break,
                Err(err) if err.is_retryable() => std::thread::yield_now(),
                Err(err) => panic!("output failed: {err}"),
            }
        }
    }

    let expected_ip: Vec<_> = frames.iter().filter(|(ty, _)| *ty == NET_PROTOCOL_TYPE_IP).collect();
    let expected_arp: Vec<_> =
        frames.iter().filter(|(ty, _)| *ty == NET_PROTOCOL_TYPE_ARP).collect();
    assert!(wait_until(WAIT, || {
        ip.len() == expected_ip.len() && arp.len() == expected_arp.len()
    }));

    for (_, data) in expected_ip {
        let entry = ip.pop().expect("ip entry");
        assert_eq!(entry.data(), data.as_slice());
        assert_eq!(entry.len(), data.len());
    }
    for (_, data) in expected_arp {
        assert_eq!(arp.pop().expect("arp entry").data(), data.as_slice());
    }
    assert!(ip.pop().is_none());
    assert!(arp.pop().is_none());
}

#[test]
fn output_before_run_is_rejected() {
    setup();
    let mut stack = NetStack::new(StackConfig::default()).expect("init");
    let dev = loopback::init(&mut stack).expect("loopback");

    let err = dev.output(NET_PROTOCOL_TYPE_IP, b"early", None).expect_err("device is down");
    assert!(matches!(err, NetError::DeviceDown { .. }));

    let running = stack.run().expect("run");
    running.output(&dev, NET_PROTOCOL_TYPE_IP, b"late", None).expect("device is up");
}

#[test]
fn mtu_boundary_on_loopback() {
    setup();
    let mut stack = NetStack::new(StackConfig::default()).expect("init");
    let ip = stack.register_protocol(NET_PROTOCOL_TYPE_IP, ignore).expect("register ip");
    let dev = loopback::init(&mut stack).expect("loopback");
    let running = stack.run().expect("run");

    let at_mtu = vec![0xa5u8; LOOPBACK_MTU];
    running.output(&dev, NET_PROTOCOL_TYPE_IP, &at_mtu, None).expect("len == mtu");

    let over_mtu = vec![0xa5u8; LOOPBACK_MTU + 1];
    let err = running.output(&dev, NET_PROTOCOL_TYPE_IP, &over_mtu, None).expect_err("len > mtu");
    assert!(matches!(err, NetError::TooLong { mtu: LOOPBACK_MTU, .. }));

    assert!(wait_until(WAIT, || ip.len() == 1));
    assert_eq!(ip.pop().expect("entry").len(), LOOPBACK_MTU);
}

#[test]
fn unknown_type_is_dropped_without_touching_queues() {
    setup();
    let mut stack = NetStack::new(StackConfig::default()).expect("init");
    let ip = stack.register_protocol(NET_PROTOCOL_TYPE_IP, ignore).expect("register ip");
    let dev = loopback::init(&mut stack).expect("loopback");
    let running = stack.run().expect("run");

    running.output(&dev, 0x88b5, b"experimental", None).expect("output");
    running.output(&dev, NET_PROTOCOL_TYPE_IP, b"marker", None).expect("output");

    // The marker is behind the unknown frame in the same FIFO.
    assert!(wait_until(WAIT, || ip.len() == 1));
    assert_eq!(ip.pop().expect("marker").data(), b"marker");
    let lo = dev.driver::<loopback::Loopback>().expect("loopback driver");
    assert_eq!(lo.queue_len(), 0);
}
