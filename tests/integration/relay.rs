//! Firmware carried over loopback UDP as relay DATA frames.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use firmwire_core::wire::{fragment_frames, RelayFrame, MAX_DATAGRAM};
use firmwire_core::Qos;
use firmwire_services::{Delivery, MessageHandler, Outcome};

use crate::*;

fn frames(message: &[u8], topic: &str, size: usize) -> Result<Vec<Vec<u8>>> {
    Ok(fragment_frames(message, topic, Qos::AtLeastOnce, size)?)
}

/// Receive datagrams until the controller reaches a verdict.
async fn receive_until_verdict<H>(socket: &UdpSocket, handler: &mut H) -> Result<Outcome>
where
    H: MessageHandler<Outcome = Outcome>,
{
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .context("no datagram within 5s")??;
        let frame = RelayFrame::decode(&buf[..len])?;
        let Some(delivery) = Delivery::from_frame(&frame) else {
            continue;
        };
        match handler.on_message(&delivery) {
            Outcome::Receiving { .. } | Outcome::Ignored(_) => continue,
            verdict => return Ok(verdict),
        }
    }
}

#[tokio::test]
async fn test_firmware_over_loopback_is_saved() -> Result<()> {
    let daemon = UdpSocket::bind("127.0.0.1:0").await?;
    let publisher = UdpSocket::bind("127.0.0.1:0").await?;
    let firmware: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
    let message = sealed(&firmware);

    for frame in frames(&message, TOPIC, 1200)? {
        publisher.send_to(&frame, daemon.local_addr()?).await?;
    }

    let mut c = controller();
    let verdict = receive_until_verdict(&daemon, &mut c).await?;
    assert!(verdict.is_accepted(), "{verdict:?}");
    assert_eq!(c.sink().saved()[0].1, firmware);
    Ok(())
}

#[tokio::test]
async fn test_other_topics_do_not_disturb_transfer() -> Result<()> {
    let daemon = UdpSocket::bind("127.0.0.1:0").await?;
    let publisher = UdpSocket::bind("127.0.0.1:0").await?;
    let message = sealed(b"interleaved with chatter");
    let chatter = sealed(b"not firmware");

    let ours = frames(&message, TOPIC, 40)?;
    let theirs = frames(&chatter, "sensors/temperature", 40)?;
    let to = daemon.local_addr()?;
    for (i, frame) in ours.iter().enumerate() {
        publisher.send_to(frame, to).await?;
        if let Some(noise) = theirs.get(i) {
            publisher.send_to(noise, to).await?;
        }
    }

    let mut c = controller();
    let verdict = receive_until_verdict(&daemon, &mut c).await?;
    assert!(verdict.is_accepted(), "{verdict:?}");
    assert_eq!(c.sink().saved().len(), 1);
    assert_eq!(c.sink().saved()[0].1, b"interleaved with chatter");
    Ok(())
}

#[tokio::test]
async fn test_abandoned_transfer_restarts_cleanly() -> Result<()> {
    let daemon = UdpSocket::bind("127.0.0.1:0").await?;
    let publisher = UdpSocket::bind("127.0.0.1:0").await?;
    let message = sealed(b"restart me");
    let to = daemon.local_addr()?;

    let all = frames(&message, TOPIC, 50)?;
    // the session drops after the first fragment
    publisher.send_to(&all[0], to).await?;

    let mut c = controller();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (len, _) = daemon.recv_from(&mut buf).await?;
    let frame = RelayFrame::decode(&buf[..len])?;
    let delivery = Delivery::from_frame(&frame).context("expected DATA")?;
    assert!(matches!(c.on_message(&delivery), Outcome::Receiving { .. }));
    c.abandon();

    // the publisher starts over from scratch
    for frame in &all {
        publisher.send_to(frame, to).await?;
    }
    let verdict = receive_until_verdict(&daemon, &mut c).await?;
    assert!(verdict.is_accepted(), "{verdict:?}");
    Ok(())
}
