//! IO core contract: pipe reads and writes, the closed-stream discipline,
//! and close interrupting a reader blocked in another thread.

use std::io::Write;
use std::time::Duration;

use garnet_runtime::{Args, Block, Env, Value, boot, exception, io, string, thread};
use serial_test::serial;

#[test]
#[serial]
fn pipe_write_then_read() {
    boot();
    let mut env = Env::new();
    let (reader, writer) = io::create_pipe(&mut env).unwrap();

    let data = string::new_string("hello pipe");
    let written = io::io_write(&mut env, writer, data).unwrap();
    assert_eq!(written, Value::integer(10));

    let read = io::io_read(&mut env, reader, Some(10)).unwrap();
    assert_eq!(read.object().string().to_rust_string(), "hello pipe");

    io::io_close(&mut env, reader).unwrap();
    io::io_close(&mut env, writer).unwrap();
}

#[test]
#[serial]
fn reading_a_closed_stream_raises() {
    boot();
    let mut env = Env::new();
    let (reader, writer) = io::create_pipe(&mut env).unwrap();
    io::io_close(&mut env, reader).unwrap();
    io::io_close(&mut env, writer).unwrap();

    let err = io::io_read(&mut env, reader, Some(1)).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("IOError")));
    assert_eq!(exception::message_of(err.0), "closed stream");

    // Closing again is a no-op.
    io::io_close(&mut env, reader).unwrap();
}

#[test]
#[serial]
fn close_interrupts_a_blocked_reader() {
    boot();
    let mut env = Env::new();
    let (reader, _writer) = io::create_pipe(&mut env).unwrap();

    // The reader thread blocks on an empty pipe; main closes the read end
    // out from under it.
    fn blocked_read(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        let reader = env.var_get(1, 0);
        io::io_read(env, reader, Some(16))
    }
    let mut captured = Env::new();
    captured.init_vars(1);
    captured.var_set(0, 0, reader);
    let block = Block::new(&captured, Value::NULL, 0, blocked_read);
    let t = thread::thread_new(&mut env, block).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    io::io_close(&mut env, reader).unwrap();

    let err = thread::thread_value(&mut env, t).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("IOError")));
    assert_eq!(exception::message_of(err.0), "closed stream");
}

#[test]
#[serial]
fn eof_reads_as_nil_with_a_length() {
    boot();
    let mut env = Env::new();
    let (reader, writer) = io::create_pipe(&mut env).unwrap();
    let data = string::new_string("x");
    io::io_write(&mut env, writer, data).unwrap();
    // Close the write end directly so the read side sees EOF.
    writer.object().io().close();

    let first = io::io_read(&mut env, reader, Some(1)).unwrap();
    assert_eq!(first.object().string().to_rust_string(), "x");
    let eof = io::io_read(&mut env, reader, Some(1)).unwrap();
    assert!(eof.is_nil());

    io::io_close(&mut env, reader).unwrap();
}

#[test]
#[serial]
fn file_open_write_stat() {
    boot();
    let mut env = Env::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garnet_io_test.txt");
    let path_str = path.to_str().unwrap();

    {
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
    }

    let file = io::file_open(&mut env, path_str, "r").unwrap();
    let contents = io::io_read(&mut env, file, Some(10)).unwrap();
    assert_eq!(contents.object().string().to_rust_string(), "0123456789");
    io::io_close(&mut env, file).unwrap();

    let stat = io::file_stat(&mut env, path_str).unwrap();
    match &stat.object().payload {
        garnet_runtime::Payload::FileStat(st) => assert_eq!(st.st_size, 10),
        _ => panic!("expected a FileStat payload"),
    }
}
