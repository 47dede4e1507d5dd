//! Cached OS thread id for the calling thread.
//!
//! `gettid` is a real syscall and loops query their own id on every
//! log line and ownership assertion, so the result is computed once
//! per thread and parked in a thread-local.

use std::cell::Cell;

thread_local! {
    static CACHED_TID: Cell<libc::pid_t> = const { Cell::new(0) };
}

/// OS-level id of the calling thread (always positive on Linux).
pub fn tid() -> i32 {
    CACHED_TID.with(|cache| {
        let mut tid = cache.get();
        if tid == 0 {
            tid = unsafe { libc::syscall(libc::SYS_gettid) as libc::pid_t };
            cache.set(tid);
        }
        tid
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tid_is_positive_and_stable() {
        let first = tid();
        assert!(first > 0);
        assert_eq!(tid(), first);
    }

    #[test]
    fn tids_differ_across_threads() {
        let mine = tid();
        let theirs = std::thread::spawn(tid).join().unwrap();
        assert!(theirs > 0);
        assert_ne!(mine, theirs);
    }
}
