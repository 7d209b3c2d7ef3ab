//! Process lifecycle: exec, join, exit and halt.

mod common;

use common::*;
use machine::{
    addressing::PAGE_SIZE,
    coff::{CoffBuilder, SectionKind},
    config::MachineConfig,
};
use userprog::kernel::ROOT_PID;

#[test]
fn exec_and_join() {
    let mut board = boot();
    let seen = Recorder::new();
    let child = Recorder::new();
    let args = Recorder::new();

    let (s, a) = (child.clone(), args.clone());
    board.install("child", move |u| {
        s.record(u.argc());
        s.record(u.sp() as i32);
        s.record((u.argv() as usize >= u.sp() as usize) as i32);
        for arg in u.args() {
            a.record(arg);
        }
        42
    });
    let s = seen.clone();
    board.install("root", move |u| {
        let pid = exec(u, "child", &["alpha", "be"]);
        s.record(pid);
        let (ret, status) = join(u, pid);
        s.record(ret);
        s.record(status);
        0
    });

    assert_eq!(board.run("root"), ROOT_PID);
    let sp = ((PAGES_PER_PROCESS - 1) * PAGE_SIZE) as i32;
    assert_eq!(seen.values(), vec![2, 1, 42]);
    assert_eq!(child.values(), vec![2, sp, 1]);
    assert_eq!(args.values(), vec!["alpha".to_string(), "be".to_string()]);
    assert!(board.machine.power().is_off());
    assert_eq!(board.kernel.live_processes(), 0);
}

#[test]
fn join_errors() {
    let mut board = boot();
    let seen = Recorder::new();

    board.install("child", |_| 3);
    let s = seen.clone();
    board.install("root", move |u| {
        s.record(join(u, 1).0);
        s.record(join(u, 99).0);
        let pid = exec(u, "child", &[]);
        s.record(join(u, pid).0);
        s.record(join(u, pid).0);

        let pid = exec(u, "child", &[]);
        let status = u.alloca(4);
        s.record(u.syscall(userprog::SyscallNumber::Join as i32, &[pid, 0x7fff_0000]));
        // A failed status pointer is checked before the child is reaped.
        s.record(u.syscall(userprog::SyscallNumber::Join as i32, &[pid, status as i32]));
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![-1, -1, 1, -1, -1, 1]);
}

#[test]
fn status_of_killed_children() {
    let mut board = boot();
    let seen = Recorder::new();

    // Stores to the text section are refused.
    board.install("vandal", |u| {
        u.write_bytes(0x10, &[0xff]);
        0
    });
    board.install("unknown", |u| {
        u.syscall(77, &[]);
        0
    });
    board.install("negative", |u| exit(u, -1));
    let s = seen.clone();
    board.install("root", move |u| {
        for name in ["vandal", "unknown", "negative"] {
            let pid = exec(u, name, &[]);
            let (ret, status) = join(u, pid);
            s.record((ret, status));
        }
        0
    });

    board.run("root");
    assert_eq!(
        seen.values(),
        vec![(0, i32::MIN), (0, i32::MIN), (1, -1)],
        "Only an explicit exit leaves a status."
    );
    assert_eq!(board.kernel.frames().free_frames(), board.kernel.frames().capacity());
}

#[test]
fn only_the_root_halts() {
    let mut board = boot();
    let seen = Recorder::new();

    let s = seen.clone();
    board.install("child", move |u| {
        s.record(halt(u));
        7
    });
    let s = seen.clone();
    board.install("root", move |u| {
        let pid = exec(u, "child", &[]);
        s.record(join(u, pid).0);
        creat(u, "left-open");
        halt(u);
        s.record(-100);
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![0, 1], "Root must not run past halt.");
    assert!(board.machine.power().is_off());
    assert_eq!(board.fs.open_handles(), 0, "Halt closes the root's files.");
    assert_eq!(board.kernel.frames().free_frames(), board.kernel.frames().capacity());
}

#[test]
fn exec_failures() {
    let mut board = boot();
    let seen = Recorder::new();

    board.install_image(
        "fragmented",
        CoffBuilder::new(0)
            .section(".text", SectionKind::Text, vec![0; 16])
            .section_at(".data", SectionKind::Data, 2 * PAGE_SIZE as u32, vec![0; 16])
            .build(),
    );
    board.install_image("garbage", b"not an executable".to_vec());
    board.install("child", |_| 0);

    let frames = board.kernel.frames().clone();
    let s = seen.clone();
    board.install("root", move |u| {
        let free = frames.free_frames();
        s.record(exec(u, "missing", &[]));
        s.record(exec(u, "fragmented", &[]));
        s.record(exec(u, "garbage", &[]));

        let long = "x".repeat(250);
        let many: Vec<&str> = (0..20).map(|_| long.as_str()).collect();
        s.record(exec(u, "child", &many));

        let name = u.push_str("child");
        let exec_no = userprog::SyscallNumber::Exec as i32;
        s.record(u.syscall(exec_no, &[0, 0, name as i32]));
        s.record(u.syscall(exec_no, &[name as i32, -1, name as i32]));
        s.record(u.syscall(exec_no, &[name as i32, 1, 0x7fff_0000]));
        s.record((frames.free_frames() == free) as i32);

        // Failed attempts consume no PID.
        let pid = exec(u, "child", &[]);
        s.record(pid);
        join(u, pid);
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![-1, -1, -1, -1, -1, -1, -1, 1, 2]);
    assert_eq!(board.fs.open_handles(), 0, "Rejected images are closed.");
}

#[test]
fn insufficient_memory() {
    let config = MachineConfig::builder().num_phys_pages(PAGES_PER_PROCESS + 5).build();
    let mut board = boot_with(config);
    let seen = Recorder::new();

    board.install("child", |_| 0);
    let frames = board.kernel.frames().clone();
    let s = seen.clone();
    board.install("root", move |u| {
        s.record(frames.free_frames() as i32);
        s.record(exec(u, "child", &[]));
        s.record(frames.free_frames() as i32);
        0
    });

    board.run("root");
    assert_eq!(seen.values(), vec![5, -1, 5]);
}

#[test]
fn orphans_outlive_their_parent() {
    let mut board = boot();

    board.install("child", |u| {
        // Give the parent every chance to exit first.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let fd = creat(u, "orphan");
        write(u, fd, b"still running");
        0
    });
    board.install("root", |u| {
        exec(u, "child", &[]);
        0
    });

    board.run("root");
    assert_eq!(board.fs.contents("orphan").as_deref(), Some(&b"still running"[..]));
    assert_eq!(board.kernel.live_processes(), 0);
    assert_eq!(board.kernel.frames().free_frames(), board.kernel.frames().capacity());
}

#[test]
fn unknown_entry_point() {
    let board = boot();
    board.install_image("idle", image(0x80));

    board.run("idle");
    assert!(board.machine.power().is_off());
    assert_eq!(board.kernel.frames().free_frames(), board.kernel.frames().capacity());
}

#[test]
fn root_must_load() {
    let board = boot();
    assert!(board.kernel.run("missing", &[]).is_err());
    assert!(!board.machine.power().is_off());
    assert_eq!(board.kernel.frames().free_frames(), board.kernel.frames().capacity());
}
