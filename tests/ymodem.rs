//! End-to-end Ymodem batch scenarios over a loopback byte pipe.

mod support;

use std::path::Path;
use std::thread;

use filexfer::config::TransferConfig;
use filexfer::local_file::mem::MemFs;
use filexfer::local_file::{LocalFileSystem, OpenMode};
use filexfer::session::{Direction, Flavor, Protocol, Session};
use filexfer::wire::Channel;
use filexfer::ymodem::block0::Block0Meta;
use filexfer::ymodem::{self, QueuedFile};

use support::loopback::pair;

#[test]
fn two_file_batch_round_trips_in_order() {
    let (sender_port, receiver_port) = pair();

    let file_a = b"first file contents".to_vec();
    let file_b: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
    let (len_a, len_b) = (file_a.len() as u64, file_b.len() as u64);

    let send_fs = MemFs::new();
    send_fs.seed("a.txt", file_a.clone());
    send_fs.seed("b.bin", file_b.clone());

    let send_session = Session::new(Protocol::Ymodem, Flavor::YmodemVanilla, Direction::Upload);
    let send_handle = send_session.handle();
    let send_cancel = send_session.cancel_flag();

    let sender = thread::spawn(move || {
        let mut channel = Channel::new(sender_port, send_cancel);
        let config = TransferConfig::default();
        let mut queued = vec![
            QueuedFile {
                meta: Block0Meta {
                    name: "a.txt".into(),
                    size: len_a,
                    mtime: None,
                    mode: None,
                    serial: None,
                },
                file: send_fs.open(Path::new("a.txt"), OpenMode::Read).unwrap(),
            },
            QueuedFile {
                meta: Block0Meta {
                    name: "b.bin".into(),
                    size: len_b,
                    mtime: None,
                    mode: None,
                    serial: None,
                },
                file: send_fs.open(Path::new("b.bin"), OpenMode::Read).unwrap(),
            },
        ];
        ymodem::send_batch(&mut channel, &mut queued, &send_session, &send_handle, &config).unwrap();
    });

    let recv_session = Session::new(Protocol::Ymodem, Flavor::YmodemVanilla, Direction::Download);
    let recv_handle = recv_session.handle();
    let recv_cancel = recv_session.cancel_flag();
    let recv_fs = MemFs::new();
    let mut channel = Channel::new(receiver_port, recv_cancel);
    let config = TransferConfig::default();
    ymodem::receive_batch(&mut channel, &recv_fs, &recv_session, &recv_handle, &config).unwrap();

    sender.join().unwrap();

    assert_eq!(recv_fs.contents(Path::new("a.txt")).unwrap(), file_a);
    assert_eq!(recv_fs.contents(Path::new("b.bin")).unwrap(), file_b);

    let files = recv_handle.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name, "a.txt");
    assert_eq!(files[1].name, "b.bin");
}

#[test]
fn streaming_g_variant_also_round_trips() {
    let (sender_port, receiver_port) = pair();

    let data: Vec<u8> = (0..5000u32).map(|i| (i * 13 % 256) as u8).collect();
    let send_fs = MemFs::new();
    send_fs.seed("g.bin", data.clone());

    let send_session = Session::new(Protocol::Ymodem, Flavor::YmodemG, Direction::Upload);
    let send_handle = send_session.handle();
    let send_cancel = send_session.cancel_flag();

    let sender = thread::spawn(move || {
        let mut channel = Channel::new(sender_port, send_cancel);
        let config = TransferConfig::default();
        let mut queued = vec![QueuedFile {
            meta: Block0Meta {
                name: "g.bin".into(),
                size: data.len() as u64,
                mtime: None,
                mode: None,
                serial: None,
            },
            file: send_fs.open(Path::new("g.bin"), OpenMode::Read).unwrap(),
        }];
        ymodem::send_batch(&mut channel, &mut queued, &send_session, &send_handle, &config).unwrap();
    });

    let recv_session = Session::new(Protocol::Ymodem, Flavor::YmodemG, Direction::Download);
    let recv_handle = recv_session.handle();
    let recv_cancel = recv_session.cancel_flag();
    let recv_fs = MemFs::new();
    let mut channel = Channel::new(receiver_port, recv_cancel);
    let config = TransferConfig::default();
    ymodem::receive_batch(&mut channel, &recv_fs, &recv_session, &recv_handle, &config).unwrap();

    sender.join().unwrap();
    assert_eq!(recv_fs.contents(Path::new("g.bin")).unwrap().len(), 5000);
}
