//! Standalone `Driver` test double for integration tests.
//!
//! The in-crate `paffs::driver::ram::RamDriver` is gated
//! `#[cfg(test)]` (it has no reason to ship in the published library),
//! so integration tests under `tests/` — which compile against the
//! crate as an ordinary external dependency — cannot reach it. This is
//! a second, independent copy built the same way, analogous to the
//! teacher's own `RefCell<File>` `Volume` double: storage lives behind
//! an `Rc<RefCell<_>>` so a test can keep a cheap [`TestDriver::handle`]
//! to the same backing pages around after the `Device` that owns the
//! original handle is dropped — simulating a power loss without ever
//! calling the graceful `unmount` path.

use paffs::addr::{BlockAbs, PageAbs};
use paffs::driver::Driver;
use paffs::error::DriverResult;
use std::cell::RefCell;
use std::rc::Rc;

struct Inner {
    page_size: usize,
    pages_per_block: usize,
    blocks: usize,
    pages: Vec<Option<Vec<u8>>>,
    bad: Vec<bool>,
    fail_after: Option<usize>,
    writes_seen: usize,
}

#[derive(Clone)]
pub struct TestDriver(Rc<RefCell<Inner>>);

impl TestDriver {
    pub fn new(page_size: usize, pages_per_block: usize, blocks: usize) -> TestDriver {
        TestDriver(Rc::new(RefCell::new(Inner {
            page_size,
            pages_per_block,
            blocks,
            pages: vec![None; pages_per_block * blocks],
            bad: vec![false; blocks],
            fail_after: None,
            writes_seen: 0,
        })))
    }

    /// A second handle onto the same backing pages. Dropping the
    /// `Device` built from the original handle (without calling
    /// `unmount`) leaves this handle's view exactly as durable as
    /// whatever `write_page`/`erase_block` calls actually happened.
    pub fn handle(&self) -> TestDriver {
        TestDriver(self.0.clone())
    }

    /// Makes every write after the `n`th fail from here on, simulating
    /// a device that stops responding.
    pub fn fail_after(&self, n: usize) {
        self.0.borrow_mut().fail_after = Some(n);
    }

    pub fn writes_seen(&self) -> usize {
        self.0.borrow().writes_seen
    }
}

impl Driver for TestDriver {
    fn write_page(&mut self, page_abs: PageAbs, buf: &[u8]) -> DriverResult {
        let mut inner = self.0.borrow_mut();
        inner.writes_seen += 1;
        if let Some(n) = inner.fail_after {
            if inner.writes_seen > n {
                return DriverResult::Fail;
            }
        }
        let idx = page_abs as usize;
        if idx >= inner.pages.len() || buf.len() > inner.page_size {
            return DriverResult::Fail;
        }
        if inner.pages[idx].is_some() {
            return DriverResult::Fail;
        }
        let page_size = inner.page_size;
        let mut data = vec![0u8; page_size];
        data[..buf.len()].copy_from_slice(buf);
        inner.pages[idx] = Some(data);
        DriverResult::Ok
    }

    fn read_page(&mut self, page_abs: PageAbs, buf: &mut [u8]) -> DriverResult {
        let inner = self.0.borrow();
        let idx = page_abs as usize;
        match inner.pages.get(idx) {
            Some(Some(data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                DriverResult::Ok
            }
            Some(None) => {
                for b in buf.iter_mut() {
                    *b = 0;
                }
                DriverResult::Ok
            }
            None => DriverResult::Fail,
        }
    }

    fn erase_block(&mut self, block_abs: BlockAbs) -> DriverResult {
        let mut inner = self.0.borrow_mut();
        let block = block_abs as usize;
        if block >= inner.blocks {
            return DriverResult::Fail;
        }
        let per_block = inner.pages_per_block;
        let start = block * per_block;
        for p in &mut inner.pages[start..start + per_block] {
            *p = None;
        }
        DriverResult::Ok
    }

    fn mark_bad(&mut self, block_abs: BlockAbs) -> DriverResult {
        self.0.borrow_mut().bad[block_abs as usize] = true;
        DriverResult::Ok
    }

    fn check_bad(&mut self, block_abs: BlockAbs) -> bool {
        self.0.borrow().bad[block_abs as usize]
    }
}
