// Copyright (C) 2022 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of syplog.
//
// syplog is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! System V shared-memory media.
//!
//! The segment is a circular array of fixed-size slots, one record per slot, each slot as large
//! as the encoder's maximum record size. Writers create the segment if need be & detach (but
//! never destroy) it on close, so that a reader in another process can still drain it. Readers
//! attach read-only & walk the slots from the front until they hit one that was never written,
//! or come to the end of the segment.
//!
//! There is no synchronization between processes beyond the slot discipline; a reader racing a
//! writer at the wrap point may see a torn record, & is expected to cope.

use crate::{
    encoder::Encoder,
    error::{Error, Result},
    record::Record,
};

use backtrace::Backtrace;

/// Largest segment we'll ask the OS for; larger requests are shrunk to this.
pub const SHM_MAX: u64 = 0x200_0000;

const WRITE_PERMISSIONS: libc::c_int = 0o660;
const READ_PERMISSIONS: libc::c_int = 0o440;

/// An attached System V shared-memory segment
pub struct ShmMedium {
    key: libc::key_t,
    addr: *mut u8,
    size: usize,
    read_only: bool,
}

// SAFETY: the mapping belongs to this value alone (nothing else in the process holds `addr`), &
// every access goes through `&mut self` or `&self` on the owning value.
unsafe impl Send for ShmMedium {}

impl ShmMedium {
    /// Create (or open) the segment at `key` for writing.
    ///
    /// Requests larger than [`SHM_MAX`] are shrunk; the returned flag tells whether that happened.
    pub fn create(key: i32, requested: u64) -> Result<(ShmMedium, bool)> {
        let capped = requested > SHM_MAX;
        let size = requested.min(SHM_MAX) as usize;
        // SAFETY: plain syscall; no pointers are involved
        let id = unsafe { libc::shmget(key as libc::key_t, size, libc::IPC_CREAT | WRITE_PERMISSIONS) };
        if id < 0 {
            return Err(Error::last_os_error());
        }
        let addr = ShmMedium::attach_id(id, 0)?;
        Ok((
            ShmMedium {
                key: key as libc::key_t,
                addr,
                size,
                read_only: false,
            },
            capped,
        ))
    }
    /// Attach read-only to the existing segment at `key`.
    pub fn attach(key: i32) -> Result<ShmMedium> {
        // SAFETY: plain syscall; no pointers are involved
        let id = unsafe { libc::shmget(key as libc::key_t, 0, READ_PERMISSIONS) };
        if id < 0 {
            return Err(Error::last_os_error());
        }
        // SAFETY: `shmid_ds` is plain old data, so all-zeroes is a valid value, & the kernel
        // fills it in
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) } < 0 {
            return Err(Error::last_os_error());
        }
        let addr = ShmMedium::attach_id(id, libc::SHM_RDONLY)?;
        Ok(ShmMedium {
            key: key as libc::key_t,
            addr,
            size: ds.shm_segsz as usize,
            read_only: true,
        })
    }
    fn attach_id(id: libc::c_int, flags: libc::c_int) -> Result<*mut u8> {
        // SAFETY: we let the kernel choose the address
        let addr = unsafe { libc::shmat(id, std::ptr::null(), flags) };
        if addr as isize == -1 {
            return Err(Error::last_os_error());
        }
        Ok(addr as *mut u8)
    }
    /// Destroy the segment at `key`; it will go away once the last process detaches.
    pub fn remove_segment(key: i32) -> Result<()> {
        // SAFETY: plain syscalls; IPC_RMID ignores the buffer argument
        unsafe {
            let id = libc::shmget(key as libc::key_t, 0, 0);
            if id < 0 {
                return Err(Error::last_os_error());
            }
            if libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) < 0 {
                return Err(Error::last_os_error());
            }
        }
        Ok(())
    }
    pub fn key(&self) -> i32 {
        self.key as i32
    }
    pub fn size(&self) -> usize {
        self.size
    }
    fn as_slice(&self) -> &[u8] {
        // SAFETY: `addr` is a live attachment of exactly `size` bytes until we're dropped
        unsafe { std::slice::from_raw_parts(self.addr, self.size) }
    }
    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; writers attach read-write
        unsafe { std::slice::from_raw_parts_mut(self.addr, self.size) }
    }
    /// Write `rec` into the slot at `pos`; the rest of the slot is zeroed.
    pub fn write(&mut self, encoder: Encoder, rec: &Record, pos: u64) -> Result<usize> {
        if self.read_only {
            return Err(Error::bad_params("shared memory segment is attached read-only"));
        }
        let pos = pos as usize;
        let slot = encoder.max_size();
        if pos + slot > self.size {
            return Err(Error::Truncated {
                requested: (pos + slot) as u64,
                granted: self.size as u64,
                back: Backtrace::new(),
            });
        }
        let dst = &mut self.as_mut_slice()[pos..pos + slot];
        let n = encoder.write_to_buffer(rec, dst)?;
        dst[n..].fill(0);
        Ok(n)
    }
    /// Read the slot at `pos`; a never-written (all-zero) slot, or one past the end of the
    /// segment, is the end of the log.
    pub fn read(&self, encoder: Encoder, rec: &mut Record, pos: u64) -> Result<usize> {
        let pos = pos as usize;
        let slot = encoder.max_size();
        if pos + slot > self.size {
            return Err(Error::EndOfLog);
        }
        let src = &self.as_slice()[pos..pos + slot];
        if src.iter().all(|b| *b == 0) {
            return Err(Error::EndOfLog);
        }
        encoder.read_from_buffer(rec, src)
    }
}

impl Drop for ShmMedium {
    fn drop(&mut self) {
        if !self.addr.is_null() {
            // SAFETY: `addr` came from `shmat` & hasn't been detached
            unsafe {
                libc::shmdt(self.addr as *const libc::c_void);
            }
            self.addr = std::ptr::null_mut();
        }
    }
}
