//! IO and File payloads
//!
//! File descriptors with a closed flag, a read buffer, encodings, and an
//! autoclose flag (honored by sweep). All blocking reads go through
//! `select_read`, which watches the current thread's interrupt pipe
//! alongside the data fd: that is how cross-thread `raise` and `close`
//! reach a thread parked in a syscall.

use std::mem::MaybeUninit;
use std::time::Duration;

use crate::env::Env;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, Payload};
use crate::safepoint;
use crate::string::{self, Encoding};
use crate::thread;
use crate::value::Value;
use crate::{Result, Unwind};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

pub struct IoPayload {
    fd: AtomicI32,
    closed: AtomicBool,
    pub path: Option<String>,
    pub read_buf: Vec<u8>,
    pub lineno: usize,
    pub sync: bool,
    pub autoclose: bool,
    pub external_encoding: Encoding,
    pub internal_encoding: Option<Encoding>,
}

impl IoPayload {
    pub fn from_fd(fd: i32, autoclose: bool) -> IoPayload {
        IoPayload {
            fd: AtomicI32::new(fd),
            closed: AtomicBool::new(false),
            path: None,
            read_buf: Vec::new(),
            lineno: 0,
            sync: false,
            autoclose,
            external_encoding: Encoding::Utf8,
            internal_encoding: None,
        }
    }

    pub fn fd(&self) -> i32 {
        self.fd.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the descriptor once; further calls are no-ops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            unsafe { libc::close(fd) };
        }
    }
}

impl Drop for IoPayload {
    fn drop(&mut self) {
        if self.autoclose && !self.is_closed() {
            self.close();
        }
    }
}

/// Wrap an existing descriptor in an IO cell.
pub fn new_io(fd: i32, autoclose: bool) -> Value {
    let klass = GlobalEnv::the().io_class();
    Heap::the().allocate(Object::new(klass, Payload::Io(Box::new(IoPayload::from_fd(fd, autoclose)))))
}

/// `IO.pipe`: (read end, write end), both autoclosed.
pub fn create_pipe(env: &mut Env) -> Result<(Value, Value), Unwind> {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(env.raise_errno());
    }
    Ok((new_io(fds[0], true), new_io(fds[1], true)))
}

/// Open a file read-only ("r") or write-create-truncate ("w").
pub fn file_open(env: &mut Env, path: &str, mode: &str) -> Result {
    let c_path = std::ffi::CString::new(path)
        .map_err(|_| env.raise("ArgumentError", "path contains a NUL byte"))?;
    let flags = match mode {
        "r" => libc::O_RDONLY,
        "w" => libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
        "a" => libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
        _ => return Err(env.raise("ArgumentError", format!("invalid access mode {mode}"))),
    };
    let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o644 as libc::c_uint) };
    if fd < 0 {
        return Err(env.raise_errno());
    }
    let klass = GlobalEnv::the().file_class();
    let mut payload = IoPayload::from_fd(fd, true);
    payload.path = Some(path.to_string());
    Ok(Heap::the().allocate(Object::new(klass, Payload::File(Box::new(payload)))))
}

/// `File.stat` / `File::Stat.new`.
pub fn file_stat(env: &mut Env, path: &str) -> Result {
    let c_path = std::ffi::CString::new(path)
        .map_err(|_| env.raise("ArgumentError", "path contains a NUL byte"))?;
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    let rc = unsafe { libc::stat(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return Err(env.raise_errno());
    }
    let klass = GlobalEnv::the().file_stat_class();
    let stat = unsafe { stat.assume_init() };
    Ok(Heap::the().allocate(Object::new(klass, Payload::FileStat(Box::new(stat)))))
}

pub enum SelectOutcome {
    Ready,
    TimedOut,
    /// Woken by the interrupt pipe or a stale descriptor; the caller
    /// re-checks its state and retries.
    Interrupted,
}

/// Wait for `fd` to become readable, watching the current thread's
/// interrupt pipe. A pending cross-thread exception raises here.
pub fn select_read(env: &mut Env, fd: i32, timeout: Option<Duration>) -> Result<SelectOutcome, Unwind> {
    let interrupt_fd = thread::current_interrupt_fd();

    let mut read_set = unsafe {
        let mut set = MaybeUninit::<libc::fd_set>::zeroed().assume_init();
        libc::FD_ZERO(&mut set);
        libc::FD_SET(fd, &mut set);
        if let Some(ifd) = interrupt_fd {
            libc::FD_SET(ifd, &mut set);
        }
        set
    };

    let nfds = fd.max(interrupt_fd.unwrap_or(-1)) + 1;
    let mut tv = timeout.map(|d| libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    });
    let tv_ptr = tv.as_mut().map_or(std::ptr::null_mut(), |tv| tv as *mut libc::timeval);

    let rc = safepoint::blocking_region(|| unsafe {
        libc::select(nfds, &mut read_set, std::ptr::null_mut(), std::ptr::null_mut(), tv_ptr)
    });

    if rc < 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        return match errno {
            libc::EINTR => {
                thread::check_pending(env)?;
                Ok(SelectOutcome::Interrupted)
            }
            libc::EBADF => Ok(SelectOutcome::Interrupted),
            _ => Err(env.raise_errno()),
        };
    }
    if rc == 0 {
        return Ok(SelectOutcome::TimedOut);
    }
    if let Some(ifd) = interrupt_fd {
        if unsafe { libc::FD_ISSET(ifd, &read_set) } {
            thread::drain_interrupt(ifd);
            thread::check_pending(env)?;
            return Ok(SelectOutcome::Interrupted);
        }
    }
    Ok(SelectOutcome::Ready)
}

fn closed_stream(env: &mut Env) -> Unwind {
    env.raise("IOError", "closed stream")
}

/// Blocking read of up to `maxlen` bytes (4 KiB default). EOF reads as nil
/// when a length was requested, an empty string otherwise.
pub fn io_read(env: &mut Env, io: Value, maxlen: Option<usize>) -> Result {
    loop {
        let fd = {
            let obj = io.object();
            let payload = obj.io();
            if payload.is_closed() {
                return Err(closed_stream(env));
            }
            payload.fd()
        };

        match select_read(env, fd, None)? {
            SelectOutcome::Interrupted | SelectOutcome::TimedOut => continue,
            SelectOutcome::Ready => {}
        }

        // Re-check: close may have raced the wakeup.
        if io.object().io().is_closed() {
            return Err(closed_stream(env));
        }

        let want = maxlen.unwrap_or(4096);
        let mut buf = vec![0u8; want.max(1)];
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::EINTR => {
                    thread::check_pending(env)?;
                    continue;
                }
                libc::EBADF => return Err(closed_stream(env)),
                _ => return Err(env.raise_errno()),
            }
        }
        if n == 0 {
            return Ok(match maxlen {
                Some(_) => GlobalEnv::the().nil_obj(),
                None => string::new_string(""),
            });
        }
        buf.truncate(n as usize);
        return Ok(string::new_string_from_bytes(buf));
    }
}

/// Blocking write of a whole String cell.
pub fn io_write(env: &mut Env, io: Value, data: Value) -> Result {
    if !data.is_string() {
        return Err(env.raise("TypeError", "no implicit conversion into String"));
    }
    let bytes = data.object().string().bytes().to_vec();
    let mut written = 0usize;
    while written < bytes.len() {
        let fd = {
            let obj = io.object();
            let payload = obj.io();
            if payload.is_closed() {
                return Err(closed_stream(env));
            }
            payload.fd()
        };
        let n = safepoint::blocking_region(|| unsafe {
            libc::write(fd, bytes[written..].as_ptr() as *const libc::c_void, bytes.len() - written)
        });
        if n < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::EINTR => {
                    thread::check_pending(env)?;
                    continue;
                }
                libc::EBADF => return Err(closed_stream(env)),
                _ => return Err(env.raise_errno()),
            }
        }
        written += n as usize;
    }
    Ok(Value::integer(written as i64))
}

/// Close the stream and wake every thread blocked in `select_read`, so
/// in-flight reads observe the closed flag. Idempotent.
pub fn io_close(_env: &mut Env, io: Value) -> Result {
    io.object().io().close();
    thread::interrupt_all();
    Ok(GlobalEnv::the().nil_obj())
}

pub fn io_is_closed(io: Value) -> bool {
    io.object().io().is_closed()
}
