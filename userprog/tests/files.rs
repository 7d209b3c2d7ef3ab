//! File system calls.

mod common;

use common::*;
use machine::addressing::PAGE_SIZE;
use userprog::SyscallNumber;

#[test]
fn create_write_close() {
    let mut board = boot();
    let seen = Recorder::new();

    let s = seen.clone();
    board.install("root", move |u| {
        let data: Vec<u8> = (0..100).collect();
        let fd = creat(u, "out");
        s.record(fd);
        s.record(write(u, fd, &data));
        s.record(write(u, fd, &[]));
        s.record(close(u, fd));
        s.record(write(u, fd, &data));
        s.record(close(u, fd));
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![2, 100, 0, 0, -1, -1]);
    assert_eq!(board.fs.contents("out"), Some((0..100).collect()));
}

#[test]
fn open_read_unlink() {
    let mut board = boot();
    let seen = Recorder::new();
    board.fs.insert("small", (0..100).collect::<Vec<u8>>());
    board.fs.insert("large", vec![7; 5000]);

    let s = seen.clone();
    board.install("root", move |u| {
        s.record(open(u, "missing"));

        let fd = open(u, "small");
        let (first, head) = read(u, fd, 60);
        let (second, tail) = read(u, fd, 60);
        s.record(first);
        s.record(second);
        s.record(read(u, fd, 60).0);
        let whole: Vec<u8> = head.into_iter().chain(tail).collect();
        s.record((whole == (0..100).collect::<Vec<u8>>()) as i32);

        let fd = open(u, "large");
        let (n, data) = read(u, fd, 6000);
        s.record(n);
        s.record(data.iter().all(|b| *b == 7) as i32);

        s.record(unlink(u, "small"));
        s.record(unlink(u, "small"));
        s.record(open(u, "small"));
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![-1, 60, 40, 0, 1, 5000, 1, 0, -1, -1]);
    assert!(!board.fs.exists("small"));
}

#[test]
fn unlinked_files_stay_open() {
    let mut board = boot();
    let seen = Recorder::new();
    board.fs.insert("doomed", b"bytes".to_vec());

    let s = seen.clone();
    board.install("root", move |u| {
        let fd = open(u, "doomed");
        s.record(unlink(u, "doomed"));
        let (n, data) = read(u, fd, 16);
        s.record(n);
        s.record((data == b"bytes") as i32);
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![0, 5, 1]);
}

#[test]
fn console() {
    let mut board = boot();
    let seen = Recorder::new();
    board.machine.console().feed(b"hi\n");

    let s = seen.clone();
    board.install("root", move |u| {
        let (n, data) = read(u, 0, 10);
        s.record(n);
        s.record((data == b"hi\n") as i32);
        s.record(read(u, 0, 10).0);
        s.record(write(u, 1, b"hello"));
        s.record(write(u, 0, b"x"));

        s.record(close(u, 1));
        s.record(write(u, 1, b"lost"));
        // Console descriptors are never handed out again.
        s.record(creat(u, "file"));
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![3, 1, 0, 5, -1, 0, -1, 2]);
    assert_eq!(board.machine.console().output_string(), "hello");
}

#[test]
fn descriptor_table_is_bounded() {
    let mut board = boot();
    let seen = Recorder::new();

    let s = seen.clone();
    board.install("root", move |u| {
        let fds: Vec<i32> = (0..14).map(|i| creat(u, &format!("f{}", i))).collect();
        s.record((fds == (2..16).collect::<Vec<_>>()) as i32);
        s.record(creat(u, "one-too-many"));
        s.record(close(u, 5));
        s.record(open(u, "f0"));
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![1, -1, 0, 5]);
    assert!(
        board.fs.exists("one-too-many"),
        "The file is created even though no descriptor was left."
    );
}

#[test]
fn bad_arguments() {
    let mut board = boot();
    let seen = Recorder::new();
    board.fs.insert("in", vec![1; 10]);

    let s = seen.clone();
    board.install("root", move |u| {
        let fd = open(u, "in");
        let buf = u.alloca(16) as i32;
        let read_no = SyscallNumber::Read as i32;
        let write_no = SyscallNumber::Write as i32;

        s.record(u.syscall(read_no, &[99, buf, 4]));
        s.record(u.syscall(read_no, &[-1, buf, 4]));
        s.record(u.syscall(read_no, &[fd, buf, -1]));
        s.record(u.syscall(write_no, &[1, buf, -5]));
        s.record(u.syscall(SyscallNumber::Close as i32, &[-3]));

        s.record(creat(u, &"n".repeat(257)));
        s.record(creat(u, &"n".repeat(256)));
        s.record(u.syscall(SyscallNumber::Unlink as i32, &[0]));
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![-1, -1, -1, -1, -1, -1, 3, -1]);
}

#[test]
fn multi_page_transfers_in_concurrent_children() {
    let mut board = boot();
    let seen = Recorder::new();
    let (first, second) = (Recorder::new(), Recorder::new());
    let data = |salt: u8| -> Vec<u8> { (0..9000).map(|i| (i % 251) as u8 ^ salt).collect() };

    for (name, r, salt) in [("first", first.clone(), 0x0f), ("second", second.clone(), 0xf0)] {
        board.install(name, move |u| {
            let expected = data(salt);
            let fd = creat(u, name);
            r.record(write(u, fd, &expected));
            close(u, fd);
            let fd = open(u, name);
            let (n, back) = read(u, fd, 9000);
            r.record(n);
            r.record((back == expected) as i32);
            0
        });
    }
    let s = seen.clone();
    board.install("root", move |u| {
        let pids = [exec(u, "first", &[]), exec(u, "second", &[])];
        for pid in pids {
            s.record(join(u, pid));
        }
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![(1, 0), (1, 0)]);
    assert_eq!(first.values(), vec![9000, 9000, 1]);
    assert_eq!(second.values(), vec![9000, 9000, 1]);
    assert_eq!(board.fs.contents("first"), Some(data(0x0f)));
    assert_eq!(board.fs.contents("second"), Some(data(0xf0)));
    assert_eq!(board.fs.open_handles(), 0, "Exit closes the descriptors left open.");
}

#[test]
fn unreadable_buffers_write_nothing() {
    let mut board = boot();
    let seen = Recorder::new();

    let s = seen.clone();
    board.install("root", move |u| {
        let fd = creat(u, "out");
        // The first page of the buffer is readable, the rest is past the end.
        let buf = (address_space_size() - PAGE_SIZE - 10) as i32;
        let size = PAGE_SIZE as i32 + 20;
        s.record(u.syscall(SyscallNumber::Write as i32, &[fd, buf, size]));
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![-1]);
    assert_eq!(board.fs.contents("out"), Some(Vec::new()));
}
