//! End-to-end Xmodem scenarios, run in-process over a loopback byte pipe
//! instead of real `sx`/`rx` subprocesses.

mod support;

use std::path::Path;
use std::thread;

use rstest::rstest;

use filexfer::config::TransferConfig;
use filexfer::local_file::mem::MemFs;
use filexfer::local_file::{LocalFileSystem, OpenMode};
use filexfer::session::{Direction, Flavor, Protocol, Session};
use filexfer::wire::Channel;
use filexfer::xmodem;

use support::loopback::pair;

fn round_trip(flavor: Flavor, data: Vec<u8>) -> Vec<u8> {
    let (sender_port, receiver_port) = pair();

    let send_session = Session::new(Protocol::Xmodem, flavor, Direction::Upload);
    let send_handle = send_session.handle();
    let send_cancel = send_session.cancel_flag();
    let send_fs = MemFs::new();
    send_fs.seed("src.bin", data.clone());

    let sender = thread::spawn(move || {
        let mut channel = Channel::new(sender_port, send_cancel);
        let config = TransferConfig::default();
        let mut file = send_fs.open(Path::new("src.bin"), OpenMode::Read).unwrap();
        xmodem::send(&mut channel, &mut file, &send_session, &send_handle, &config).unwrap();
    });

    let recv_session = Session::new(Protocol::Xmodem, flavor, Direction::Download);
    let recv_handle = recv_session.handle();
    let recv_cancel = recv_session.cancel_flag();
    let recv_fs = MemFs::new();
    let mut recv_channel = Channel::new(receiver_port, recv_cancel);
    let config = TransferConfig::default();
    let mut recv_file = recv_fs.open(Path::new("out.bin"), OpenMode::Write).unwrap();
    xmodem::receive(
        &mut recv_channel,
        &mut recv_file,
        &recv_session,
        &recv_handle,
        &config,
    )
    .unwrap();

    sender.join().unwrap();
    recv_fs.contents(Path::new("out.bin")).unwrap()
}

#[rstest]
#[case::crc_exact_blocks(Flavor::XmodemCrc, (0..1024u32).map(|i| (i % 251) as u8).collect())]
#[case::one_k_short_final_block(Flavor::Xmodem1K, (0..1500u32).map(|i| (i * 7 % 256) as u8).collect())]
#[case::vanilla_checksum(Flavor::XmodemVanilla, b"the quick brown fox jumps over the lazy dog".to_vec())]
#[case::one_k_g_streaming(Flavor::Xmodem1KG, (0..4000u32).map(|i| (i * 11 % 256) as u8).collect())]
#[case::relaxed_checksum(Flavor::XmodemRelaxed, (0..300u32).map(|i| (i % 256) as u8).collect())]
fn flavor_round_trips_exact_bytes(#[case] flavor: Flavor, #[case] data: Vec<u8>) {
    let received = round_trip(flavor, data.clone());
    assert_eq!(received, data);
}

/// A peer that opens the handshake then immediately sends the 2x-`CAN`
/// abort sequence instead of a first block.
#[test]
fn peer_cancel_is_reported_as_remote_cancel() {
    use filexfer::error::TransferError;
    use filexfer::wire::TimedPort;
    use std::io::Read as IoRead;

    let (mut attacker_port, receiver_port) = pair();

    let attacker = thread::spawn(move || {
        // Wait for the receiver's handshake byte, then cancel.
        let mut byte = [0u8; 1];
        attacker_port.set_read_timeout(std::time::Duration::from_secs(5)).unwrap();
        attacker_port.read_exact(&mut byte).unwrap();
        std::io::Write::write_all(&mut attacker_port, &[0x18, 0x18]).unwrap();
    });

    let recv_session = Session::new(Protocol::Xmodem, Flavor::XmodemCrc, Direction::Download);
    let recv_handle = recv_session.handle();
    let recv_cancel = recv_session.cancel_flag();
    let recv_fs = MemFs::new();
    let mut recv_channel = Channel::new(receiver_port, recv_cancel);
    let config = TransferConfig::default();
    let mut recv_file = recv_fs.open(Path::new("out.bin"), OpenMode::Write).unwrap();

    let result = xmodem::receive(
        &mut recv_channel,
        &mut recv_file,
        &recv_session,
        &recv_handle,
        &config,
    );

    attacker.join().unwrap();
    assert!(matches!(result, Err(TransferError::RemoteCancel)));
}
